//! Mock plugin modules exercising every capability the host queries.

use crossbeam_channel::{bounded, Receiver, Sender, RecvTimeoutError};
use reyer_rt::graphics::backend::Canvas;
use reyer_rt::plugin::{
    Calibration, Lifecycle, Plugin, PluginModule, RenderTask, SampleSink, SampleSource,
    SampleStage,
};
use reyer_rt::sync::CancelToken;
use reyer_rt::types::{CalibrationPoint, EyeSample, RenderContext};
use reyer_rt::plugin::PluginInfo;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn info(name: &str) -> PluginInfo {
    PluginInfo {
        name: name.to_string(),
        author: "tests".to_string(),
        description: String::new(),
        version: 0x0001_0000,
    }
}

/// Lifecycle call counters shared with the test body.
#[derive(Default)]
pub struct LifecycleCounters {
    pub inits: AtomicU32,
    pub shutdowns: AtomicU32,
    pub resets: AtomicU32,
}

// ---- Source ----

/// A source fed through a channel. `wait_for_sample` polls so it can
/// observe both its own cancellation and the pipeline stop token.
pub struct ChannelSource {
    feed: Receiver<EyeSample>,
    cancelled: AtomicBool,
    pub lifecycle: Arc<LifecycleCounters>,
}

impl SampleSource for ChannelSource {
    fn wait_for_sample(&self, out: &mut EyeSample, stop: &CancelToken) -> bool {
        loop {
            if self.cancelled.load(Ordering::SeqCst) || stop.is_cancelled() {
                return false;
            }
            match self.feed.recv_timeout(Duration::from_millis(5)) {
                Ok(sample) => {
                    *out = sample;
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Lifecycle for ChannelSource {
    fn init(&self) {
        self.lifecycle.inits.fetch_add(1, Ordering::SeqCst);
    }
    fn shutdown(&self) {
        self.lifecycle.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
    fn reset(&self) {
        self.lifecycle.resets.fetch_add(1, Ordering::SeqCst);
    }
}

impl PluginModule for ChannelSource {
    fn as_source(&self) -> Option<&dyn SampleSource> {
        Some(self)
    }
    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
}

/// Build a channel-fed source plugin. Returns the feeder side, the
/// plugin and its lifecycle counters.
pub fn channel_source(name: &str) -> (Sender<EyeSample>, Plugin, Arc<LifecycleCounters>) {
    let (tx, rx) = bounded(1024);
    let lifecycle = Arc::new(LifecycleCounters::default());
    let plugin = Plugin::from_module(
        Box::new(ChannelSource {
            feed: rx,
            cancelled: AtomicBool::new(false),
            lifecycle: Arc::clone(&lifecycle),
        }),
        info(name),
    );
    (tx, plugin, lifecycle)
}

// ---- Stage ----

/// Doubles the horizontal raw gaze of both eyes.
pub struct DoublingStage;

impl SampleStage for DoublingStage {
    fn process(&self, sample: &mut EyeSample) {
        sample.left.gaze.raw.x *= 2.0;
        sample.right.gaze.raw.x *= 2.0;
    }
}

impl PluginModule for DoublingStage {
    fn as_stage(&self) -> Option<&dyn SampleStage> {
        Some(self)
    }
}

pub fn doubling_stage(name: &str) -> Plugin {
    Plugin::from_module(Box::new(DoublingStage), info(name))
}

// ---- Sink ----

/// Records every consumed sample.
pub struct RecordingSink {
    pub samples: Arc<Mutex<Vec<EyeSample>>>,
}

impl SampleSink for RecordingSink {
    fn consume(&self, sample: &EyeSample) {
        self.samples.lock().unwrap().push(*sample);
    }
}

impl PluginModule for RecordingSink {
    fn as_sink(&self) -> Option<&dyn SampleSink> {
        Some(self)
    }
}

pub fn recording_sink(name: &str) -> (Plugin, Arc<Mutex<Vec<EyeSample>>>) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let plugin = Plugin::from_module(
        Box::new(RecordingSink {
            samples: Arc::clone(&samples),
        }),
        info(name),
    );
    (plugin, samples)
}

// ---- Calibration ----

/// Shifts horizontal raw gaze by an offset settable through pushed
/// calibration points (the offset becomes the first point's control x).
pub struct OffsetCalibration {
    pub offset: Arc<Mutex<f32>>,
    pub points_seen: Arc<Mutex<Vec<CalibrationPoint>>>,
}

impl Calibration for OffsetCalibration {
    fn push_points(&self, points: &[CalibrationPoint]) {
        if let Some(first) = points.first() {
            *self.offset.lock().unwrap() = first.control.x;
        }
        self.points_seen.lock().unwrap().extend_from_slice(points);
    }

    fn calibrate(&self, sample: &mut EyeSample) {
        let offset = *self.offset.lock().unwrap();
        sample.left.gaze.raw.x += offset;
        sample.right.gaze.raw.x += offset;
    }
}

impl PluginModule for OffsetCalibration {
    fn as_calibration(&self) -> Option<&dyn Calibration> {
        Some(self)
    }
}

pub struct CalibrationHarness {
    pub plugin: Plugin,
    pub offset: Arc<Mutex<f32>>,
    pub points_seen: Arc<Mutex<Vec<CalibrationPoint>>>,
}

pub fn offset_calibration(name: &str) -> CalibrationHarness {
    let offset = Arc::new(Mutex::new(0.0));
    let points_seen = Arc::new(Mutex::new(Vec::new()));
    let plugin = Plugin::from_module(
        Box::new(OffsetCalibration {
            offset: Arc::clone(&offset),
            points_seen: Arc::clone(&points_seen),
        }),
        info(name),
    );
    CalibrationHarness {
        plugin,
        offset,
        points_seen,
    }
}

// ---- Render task ----

/// Counters exposed by [`CountingRender`].
#[derive(Default)]
pub struct RenderCounters {
    pub renders: AtomicU32,
    pub consumed: AtomicU32,
    pub inits: AtomicU32,
    pub shutdowns: AtomicU32,
    pub resets: AtomicU32,
}

/// A render task that finishes after a fixed number of frames and sinks
/// samples like real tasks do.
pub struct CountingRender {
    pub counters: Arc<RenderCounters>,
    /// 0 means never finish.
    pub finish_after: u32,
    pub context: Mutex<Option<RenderContext>>,
    pub config: Mutex<String>,
    pub queued_points: Mutex<Vec<CalibrationPoint>>,
}

impl RenderTask for CountingRender {
    fn set_render_context(&self, ctx: RenderContext) {
        *self.context.lock().unwrap() = Some(ctx);
    }

    fn render(&self, canvas: &mut Canvas) {
        canvas.clear(10, 10, 10);
        self.counters.renders.fetch_add(1, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.finish_after != 0 && self.counters.renders.load(Ordering::SeqCst) >= self.finish_after
    }

    fn take_calibration_points(&self) -> Vec<CalibrationPoint> {
        std::mem::take(&mut *self.queued_points.lock().unwrap())
    }
}

impl SampleSink for CountingRender {
    fn consume(&self, _sample: &EyeSample) {
        self.counters.consumed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Lifecycle for CountingRender {
    fn init(&self) {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
    }
    fn shutdown(&self) {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
    fn reset(&self) {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
    }
}

impl reyer_rt::plugin::Configurable for CountingRender {
    fn config_schema(&self) -> String {
        "{}".to_string()
    }
    fn default_config(&self) -> String {
        "{}".to_string()
    }
    fn set_config_str(&self, config: &str) {
        *self.config.lock().unwrap() = config.to_string();
    }
}

impl PluginModule for CountingRender {
    fn as_render(&self) -> Option<&dyn RenderTask> {
        Some(self)
    }
    fn as_sink(&self) -> Option<&dyn SampleSink> {
        Some(self)
    }
    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
    fn as_configurable(&self) -> Option<&dyn reyer_rt::plugin::Configurable> {
        Some(self)
    }
}

pub fn counting_render(name: &str, finish_after: u32) -> (Plugin, Arc<RenderCounters>) {
    let counters = Arc::new(RenderCounters::default());
    let plugin = Plugin::from_module(
        Box::new(CountingRender {
            counters: Arc::clone(&counters),
            finish_after,
            context: Mutex::new(None),
            config: Mutex::new(String::new()),
            queued_points: Mutex::new(Vec::new()),
        }),
        info(name),
    );
    (plugin, counters)
}
