//! Production window backend: winit event loop, pixels surface,
//! tiny-skia canvas.
//!
//! winit delivers events through callbacks, so the backend pumps the
//! event loop non-blocking each frame and latches the state the render
//! loop polls. Window creation must happen inside a pump (winit hands
//! out its `ActiveEventLoop` only there), so `open` parks a pending
//! request and pumps until it resolves.

use crate::error::{Result, RtError};
use crate::graphics::backend::{Canvas, FrameInput, OpenedWindow, WindowBackend};
use crate::net::messages::{GraphicsSettings, MonitorInfo};
use pixels::{Pixels, PixelsBuilder, SurfaceTexture};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::Key;
use winit::platform::pump_events::EventLoopExtPumpEvents;
use winit::window::{Fullscreen, Window, WindowId};

/// How long `open` waits for the event loop to create the window.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Monitor physical size is not exposed by the windowing layer; sizes
/// are estimated from pixel dimensions at this density.
const ASSUMED_DPI: f64 = 96.0;

struct PendingOpen {
    settings: GraphicsSettings,
    title: String,
}

#[derive(Default)]
struct WindowState {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    canvas: Option<Canvas>,
    monitors: Vec<MonitorInfo>,
    monitors_probed: bool,
    pending_open: Option<PendingOpen>,
    open_result: Option<Result<OpenedWindow>>,
    close_requested: bool,
    keys: Vec<char>,
}

impl WindowState {
    fn probe_monitors(&mut self, event_loop: &ActiveEventLoop) {
        if self.monitors_probed {
            return;
        }
        self.monitors = event_loop
            .available_monitors()
            .enumerate()
            .map(|(index, monitor)| {
                let size = monitor.size();
                MonitorInfo {
                    index,
                    width_px: size.width,
                    height_px: size.height,
                    width_mm: estimate_mm(size.width),
                    height_mm: estimate_mm(size.height),
                    refresh_rate: monitor
                        .refresh_rate_millihertz()
                        .map(|mhz| mhz / 1000)
                        .unwrap_or(0),
                    name: monitor.name().unwrap_or_default(),
                }
            })
            .collect();
        self.monitors_probed = true;
    }

    fn try_open(&mut self, event_loop: &ActiveEventLoop) {
        let Some(pending) = self.pending_open.take() else {
            return;
        };
        let result = self.create_window(event_loop, &pending);
        self.open_result = Some(result);
    }

    fn create_window(
        &mut self,
        event_loop: &ActiveEventLoop,
        pending: &PendingOpen,
    ) -> Result<OpenedWindow> {
        let settings = &pending.settings;
        let monitor_handle = event_loop
            .available_monitors()
            .nth(settings.monitor_index)
            .or_else(|| event_loop.primary_monitor())
            .ok_or_else(|| {
                RtError::InvalidArgument(format!("no monitor {}", settings.monitor_index))
            })?;

        let mut attributes = Window::default_attributes()
            .with_title(pending.title.clone())
            .with_inner_size(PhysicalSize::new(settings.width, settings.height))
            .with_resizable(false);
        if settings.full_screen {
            attributes =
                attributes.with_fullscreen(Some(Fullscreen::Borderless(Some(monitor_handle))));
        }

        let window = Arc::new(event_loop.create_window(attributes).map_err(|e| {
            RtError::ResourceUnavailable(format!("failed to create window: {e}"))
        })?);
        window.set_cursor_visible(false);

        let size = window.inner_size();
        let surface = SurfaceTexture::new(size.width, size.height, window.clone());
        let pixels = PixelsBuilder::new(size.width, size.height, surface)
            .enable_vsync(settings.vsync)
            .build()
            .map_err(|e| {
                RtError::ResourceUnavailable(format!("failed to create surface: {e}"))
            })?;

        let canvas = Canvas::new(size.width, size.height, settings.anti_aliasing)?;
        let monitor = self
            .monitors
            .get(settings.monitor_index)
            .cloned()
            .unwrap_or_else(|| MonitorInfo {
                index: settings.monitor_index,
                width_px: size.width,
                height_px: size.height,
                width_mm: estimate_mm(size.width),
                height_mm: estimate_mm(size.height),
                refresh_rate: 0,
                name: String::new(),
            });

        window.request_redraw();
        self.window = Some(window);
        self.pixels = Some(pixels);
        self.canvas = Some(canvas);

        tracing::info!(
            "window opened: {}x{} on monitor {} (vsync: {}, fullscreen: {})",
            size.width,
            size.height,
            settings.monitor_index,
            settings.vsync,
            settings.full_screen,
        );

        Ok(OpenedWindow {
            width: size.width,
            height: size.height,
            monitor,
        })
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        self.probe_monitors(event_loop);
        self.try_open(event_loop);
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.close_requested = true,
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                if let Key::Character(text) = event.logical_key {
                    self.keys
                        .extend(text.chars().flat_map(|c| c.to_lowercase()));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.probe_monitors(event_loop);
        self.try_open(event_loop);
    }
}

fn estimate_mm(px: u32) -> u32 {
    (px as f64 * 25.4 / ASSUMED_DPI) as u32
}

/// The production backend. Must live on the process's first thread.
pub struct WinitBackend {
    event_loop: EventLoop<()>,
    state: WindowState,
    target_fps: u32,
    vsync: bool,
    last_present: Instant,
}

impl WinitBackend {
    pub fn new() -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| {
            RtError::ResourceUnavailable(format!("failed to create event loop: {e}"))
        })?;
        Ok(Self {
            event_loop,
            state: WindowState::default(),
            target_fps: 0,
            vsync: true,
            last_present: Instant::now(),
        })
    }

    fn pump(&mut self) {
        let _ = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
    }

    /// Sleep out the remainder of the frame when vsync is off.
    fn pace(&mut self) {
        if self.vsync || self.target_fps == 0 {
            self.last_present = Instant::now();
            return;
        }
        let target = Duration::from_nanos(1_000_000_000 / self.target_fps as u64);
        let elapsed = self.last_present.elapsed();
        if elapsed < target {
            std::thread::sleep(target - elapsed);
        }
        self.last_present = Instant::now();
    }
}

impl WindowBackend for WinitBackend {
    fn probe_monitors(&mut self) -> Result<Vec<MonitorInfo>> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !self.state.monitors_probed && Instant::now() < deadline {
            self.pump();
            std::thread::sleep(Duration::from_millis(10));
        }
        if !self.state.monitors_probed {
            return Err(RtError::ResourceUnavailable(
                "monitor enumeration timed out".to_string(),
            ));
        }
        tracing::info!("{} monitor(s) detected", self.state.monitors.len());
        Ok(self.state.monitors.clone())
    }

    fn open(&mut self, settings: &GraphicsSettings, title: &str) -> Result<OpenedWindow> {
        if self.state.window.is_some() {
            return Err(RtError::NotPermitted("window already open".to_string()));
        }
        self.target_fps = settings.target_fps;
        self.vsync = settings.vsync;
        self.state.pending_open = Some(PendingOpen {
            settings: *settings,
            title: title.to_string(),
        });

        let deadline = Instant::now() + OPEN_TIMEOUT;
        loop {
            self.pump();
            if let Some(result) = self.state.open_result.take() {
                return result;
            }
            if Instant::now() >= deadline {
                self.state.pending_open = None;
                return Err(RtError::ResourceUnavailable(
                    "window creation timed out".to_string(),
                ));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn poll_input(&mut self) -> FrameInput {
        self.pump();
        FrameInput {
            close_requested: self.state.close_requested,
            keys: std::mem::take(&mut self.state.keys),
        }
    }

    fn begin_frame(&mut self) -> Option<&mut Canvas> {
        self.state.canvas.as_mut()
    }

    fn end_frame(&mut self) -> Result<()> {
        let (Some(pixels), Some(canvas)) = (&mut self.state.pixels, &self.state.canvas) else {
            return Err(RtError::ResourceUnavailable("no window surface".to_string()));
        };
        pixels.frame_mut().copy_from_slice(canvas.pixmap().data());
        pixels
            .render()
            .map_err(|e| RtError::ResourceUnavailable(format!("present failed: {e}")))?;
        self.pace();
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        if let Some(window) = &self.state.window {
            window.set_title(title);
        }
    }

    fn close(&mut self) {
        // Surfaces hold GPU resources tied to the window; drop them first.
        self.state.pixels = None;
        self.state.canvas = None;
        self.state.window = None;
        self.pump();
    }
}
