//! The graphics/render loop.
//!
//! Owns the window and the currently rendering task. Runs on the thread
//! that created the window: render plugins assume the graphics context
//! is current, so task adoption, init and shutdown all happen here; the
//! protocol controller can only hand work over through the shared
//! handle.
//!
//! ```text
//! DEFAULT ──(apply-graphics-settings)──▶ READY
//! READY ── pending-task set ──▶ renders task
//! READY ── pending-task clear ──▶ shows standby
//! ```

pub mod backend;
pub mod window;

use crate::broadcast::BroadcastHandle;
use crate::error::{Result, RtError};
use crate::net::messages::{
    GraphicsSettings, GraphicsSettingsRequest, MonitorInfo, ProtocolEvent, ProtocolEventMessage,
};
use crate::pipeline::PipelineHandle;
use crate::plugin::Plugin;
use crate::sync::{one_shot, BoundedQueue, CancelToken};
use crate::types::RenderContext;
use backend::{Canvas, WindowBackend};
use crossbeam_channel::Receiver;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiny_skia::{Paint, Rect, Transform};

/// Backoff while waiting for graphics settings in DEFAULT.
const SETTINGS_POLL: Duration = Duration::from_millis(100);

/// A settings request with its one-shot reply.
struct SettingsEnvelope {
    request: GraphicsSettingsRequest,
    reply: crossbeam_channel::Sender<Result<()>>,
}

enum TaskCommand {
    Adopt(Plugin),
    Clear,
}

/// Protocol metadata shown on the standby screen.
#[derive(Debug, Clone, Default)]
pub struct StandbyInfo {
    pub protocol_name: String,
    pub protocol_uuid: String,
}

struct GraphicsShared {
    settings_queue: BoundedQueue<SettingsEnvelope>,
    pending_task: Mutex<Option<TaskCommand>>,
    standby_info: Mutex<Option<StandbyInfo>>,
    monitors: Mutex<Vec<MonitorInfo>>,
    render_context: Mutex<Option<RenderContext>>,
    current_settings: Mutex<Option<GraphicsSettings>>,
    initialized: AtomicBool,
    stop_requested: AtomicBool,
    start_requested: AtomicBool,
    task_finished: AtomicBool,
    task_failed: AtomicBool,
}

/// Clonable control surface over the render loop.
#[derive(Clone)]
pub struct GraphicsHandle {
    shared: Arc<GraphicsShared>,
}

impl GraphicsHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(GraphicsShared {
                settings_queue: BoundedQueue::new(4),
                pending_task: Mutex::new(None),
                standby_info: Mutex::new(None),
                monitors: Mutex::new(Vec::new()),
                render_context: Mutex::new(None),
                current_settings: Mutex::new(None),
                initialized: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                start_requested: AtomicBool::new(false),
                task_finished: AtomicBool::new(false),
                task_failed: AtomicBool::new(false),
            }),
        }
    }

    /// Queue graphics settings for the render thread. Fails the reply
    /// immediately with `NotPermitted` once graphics is initialized;
    /// settings are applied exactly once.
    pub fn apply_settings(&self, request: GraphicsSettingsRequest) -> Receiver<Result<()>> {
        let (reply, rx) = one_shot();
        if self.is_initialized() {
            let _ = reply.send(Err(RtError::NotPermitted(
                "graphics settings already applied".to_string(),
            )));
            return rx;
        }
        if self.stop_requested() {
            let _ = reply.send(Err(RtError::ResourceUnavailable(
                "graphics loop is stopping".to_string(),
            )));
            return rx;
        }
        if !self
            .shared
            .settings_queue
            .try_push(SettingsEnvelope { request, reply })
        {
            // The queue only fills if settings are spammed before the
            // loop drains the first request; the first one still wins.
            tracing::warn!("graphics settings queue full; request rejected");
        }
        rx
    }

    /// Hand a task to the render thread. Context assignment and init
    /// happen there, at the top of the next frame.
    pub fn set_pending_task(&self, task: Plugin) {
        *self.shared.pending_task.lock().expect("graphics poisoned") =
            Some(TaskCommand::Adopt(task));
        self.shared.task_finished.store(false, Ordering::SeqCst);
        self.shared.task_failed.store(false, Ordering::SeqCst);
    }

    /// Drop the current task at the top of the next frame. Lifecycle
    /// teardown stays with the caller.
    pub fn clear_task(&self) {
        *self.shared.pending_task.lock().expect("graphics poisoned") = Some(TaskCommand::Clear);
    }

    pub fn set_standby_info(&self, info: StandbyInfo) {
        *self.shared.standby_info.lock().expect("graphics poisoned") = Some(info);
    }

    pub fn clear_standby_info(&self) {
        *self.shared.standby_info.lock().expect("graphics poisoned") = None;
    }

    /// True exactly once per operator start gesture.
    pub fn consume_start_request(&self) -> bool {
        self.shared.start_requested.swap(false, Ordering::SeqCst)
    }

    /// Whether the active render reported completion.
    pub fn is_current_task_finished(&self) -> bool {
        self.shared.task_finished.load(Ordering::SeqCst)
    }

    /// True exactly once after the active render faulted.
    pub fn consume_task_failure(&self) -> bool {
        self.shared.task_failed.swap(false, Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    pub fn monitors(&self) -> Vec<MonitorInfo> {
        self.shared.monitors.lock().expect("graphics poisoned").clone()
    }

    pub fn render_context(&self) -> Option<RenderContext> {
        *self.shared.render_context.lock().expect("graphics poisoned")
    }

    pub fn current_settings(&self) -> Option<GraphicsSettings> {
        *self
            .shared
            .current_settings
            .lock()
            .expect("graphics poisoned")
    }
}

/// The render loop. Runs on the main thread via [`GraphicsLoop::run`].
pub struct GraphicsLoop {
    handle: GraphicsHandle,
    backend: Box<dyn WindowBackend>,
    pipeline: PipelineHandle,
    broadcast: BroadcastHandle,
    stop: CancelToken,
    start_key: char,
    current_task: Option<Plugin>,
    shown_title: String,
}

impl GraphicsLoop {
    pub fn new(
        backend: Box<dyn WindowBackend>,
        pipeline: PipelineHandle,
        broadcast: BroadcastHandle,
        stop: CancelToken,
        start_key: char,
    ) -> Self {
        Self {
            handle: GraphicsHandle::new(),
            backend,
            pipeline,
            broadcast,
            stop,
            start_key,
            current_task: None,
            shown_title: String::new(),
        }
    }

    pub fn handle(&self) -> GraphicsHandle {
        self.handle.clone()
    }

    /// Probe monitors before any window exists.
    pub fn init(&mut self) -> Result<()> {
        let monitors = self.backend.probe_monitors()?;
        *self.handle.shared.monitors.lock().expect("graphics poisoned") = monitors;
        Ok(())
    }

    /// Drive frames until the window closes or a stop is requested.
    pub fn run(&mut self) {
        while !self.stop.is_cancelled() && !self.handle.stop_requested() {
            if self.handle.is_initialized() {
                self.frame();
            } else {
                self.await_settings();
            }
        }
        self.shutdown();
    }

    fn await_settings(&mut self) {
        let Some(envelope) = self.handle.shared.settings_queue.try_pop() else {
            std::thread::sleep(SETTINGS_POLL);
            return;
        };
        let result = self.apply_settings(&envelope.request);
        let failed = result.is_err();
        let _ = envelope.reply.send(result);
        if !failed {
            self.broadcast
                .protocol_event(&ProtocolEventMessage::task(ProtocolEvent::GraphicsReady, "", 0));
        }
    }

    fn apply_settings(&mut self, request: &GraphicsSettingsRequest) -> Result<()> {
        let opened = self.backend.open(&request.graphics_settings, "Reyer")?;
        let ctx = RenderContext::from_geometry(
            opened.width,
            opened.height,
            opened.monitor.width_mm,
            opened.monitor.height_mm,
            request.view_distance_mm,
        );
        tracing::info!(
            "graphics ready: {}x{} on \"{}\", ppd {:.2}x{:.2}",
            opened.width,
            opened.height,
            opened.monitor.name,
            ctx.ppd_x,
            ctx.ppd_y,
        );

        let shared = &self.handle.shared;
        *shared.render_context.lock().expect("graphics poisoned") = Some(ctx);
        *shared.current_settings.lock().expect("graphics poisoned") =
            Some(request.graphics_settings);
        shared.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn frame(&mut self) {
        let input = self.backend.poll_input();
        if input.close_requested {
            self.handle.request_stop();
            return;
        }

        self.adopt_pending_task();

        if self.current_task.is_some() {
            self.render_task_frame();
        } else {
            self.standby_frame(&input.keys);
        }
    }

    fn adopt_pending_task(&mut self) {
        let command = self
            .handle
            .shared
            .pending_task
            .lock()
            .expect("graphics poisoned")
            .take();
        match command {
            None => {}
            Some(TaskCommand::Clear) => {
                // Lifecycle teardown belongs to the protocol controller;
                // just stop rendering it.
                self.current_task = None;
            }
            Some(TaskCommand::Adopt(task)) => {
                self.current_task = None;
                self.adopt(task);
            }
        }
    }

    fn adopt(&mut self, task: Plugin) {
        // Relative assets resolve against the plugin's own directory.
        if let Some(dir) = task.path().parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = std::env::set_current_dir(dir) {
                tracing::warn!("could not enter plugin directory {}: {e}", dir.display());
            }
        }

        if let Some(render) = task.as_render() {
            if let Some(ctx) = self.handle.render_context() {
                render.set_render_context(ctx);
            }
        }
        if let Some(lifecycle) = task.as_lifecycle() {
            if catch_unwind(AssertUnwindSafe(|| lifecycle.init())).is_err() {
                // Same handling as a render fault: the controller sees
                // the failure and ends the run.
                tracing::error!("task \"{}\" panicked during init; dropped", task.name());
                self.handle.shared.task_failed.store(true, Ordering::SeqCst);
                return;
            }
        }

        tracing::info!("rendering task \"{}\"", task.name());
        self.handle.shared.task_finished.store(false, Ordering::SeqCst);
        self.current_task = Some(task);
    }

    fn render_task_frame(&mut self) {
        let Some(task) = self.current_task.clone() else {
            return;
        };
        let Some(render) = task.as_render() else {
            tracing::error!("task \"{}\" lost its render capability", task.name());
            self.current_task = None;
            return;
        };

        if let Some(canvas) = self.backend.begin_frame() {
            canvas.clear(128, 128, 128);
            if catch_unwind(AssertUnwindSafe(|| render.render(canvas))).is_err() {
                // The plugin's fault must not tear the host down: stop
                // rendering it and let the controller end the run.
                tracing::error!("task \"{}\" panicked during render", task.name());
                self.handle.shared.task_failed.store(true, Ordering::SeqCst);
                self.current_task = None;
                return;
            }
            if let Err(e) = self.backend.end_frame() {
                tracing::warn!("frame present failed: {e}");
            }
        } else {
            self.handle.request_stop();
            return;
        }

        let points = render.take_calibration_points();
        if !points.is_empty() {
            self.pipeline.push_calibration_points(&points);
        }

        if render.is_finished() {
            self.handle.shared.task_finished.store(true, Ordering::SeqCst);
        }
    }

    fn standby_frame(&mut self, keys: &[char]) {
        let info = self
            .handle
            .shared
            .standby_info
            .lock()
            .expect("graphics poisoned")
            .clone();

        if info.is_some() && keys.contains(&self.start_key) {
            self.handle.shared.start_requested.store(true, Ordering::SeqCst);
            return;
        }

        let title = match &info {
            Some(info) if !info.protocol_uuid.is_empty() => {
                format!("Reyer - {} [{}]", info.protocol_name, info.protocol_uuid)
            }
            Some(info) => format!("Reyer - {}", info.protocol_name),
            None => "Reyer".to_string(),
        };
        if title != self.shown_title {
            self.backend.set_title(&title);
            self.shown_title = title;
        }

        if let Some(canvas) = self.backend.begin_frame() {
            paint_standby(canvas, info.is_some());
            if let Err(e) = self.backend.end_frame() {
                tracing::warn!("frame present failed: {e}");
            }
        } else {
            self.handle.request_stop();
        }
    }

    fn shutdown(&mut self) {
        // Dropping queued settings envelopes disconnects their reply
        // channels, so blocked requesters fail instead of hanging.
        while self.handle.shared.settings_queue.try_pop().is_some() {}

        // A pending clear or replacement means the controller already
        // tore the current task down; don't run its lifecycle twice.
        if self
            .handle
            .shared
            .pending_task
            .lock()
            .expect("graphics poisoned")
            .take()
            .is_some()
        {
            self.current_task = None;
        }

        // The task may own GPU resources; shut it down while the window
        // and its context still exist.
        if let Some(task) = self.current_task.take() {
            if let Some(lifecycle) = task.as_lifecycle() {
                let _ = catch_unwind(AssertUnwindSafe(|| {
                    lifecycle.reset();
                    lifecycle.shutdown();
                }));
            }
            tracing::info!("task \"{}\" shut down", task.name());
        }
        self.backend.close();
        tracing::info!("graphics loop exited");
    }
}

/// Black screen with a centered fixation cross while a protocol waits
/// for its start gesture.
fn paint_standby(canvas: &mut Canvas, has_protocol: bool) {
    canvas.clear(0, 0, 0);
    if !has_protocol {
        return;
    }

    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let mut paint = Paint::default();
    paint.set_color_rgba8(255, 255, 255, 255);

    let arm = (w.min(h) * 0.04).max(8.0);
    let thickness = (arm / 6.0).max(2.0);
    let pixmap = canvas.pixmap_mut();
    if let Some(rect) =
        Rect::from_xywh(w / 2.0 - arm, h / 2.0 - thickness / 2.0, arm * 2.0, thickness)
    {
        pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }
    if let Some(rect) =
        Rect::from_xywh(w / 2.0 - thickness / 2.0, h / 2.0 - arm, thickness, arm * 2.0)
    {
        pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }
}
