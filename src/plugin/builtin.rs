//! Built-in plugin modules.
//!
//! A small set of host-compiled plugins so the runtime is usable and
//! demonstrable without any shared library on disk: a synthetic gaze
//! source, a moving-average filter stage, a per-eye linear calibration
//! and a fixation-dot render task. They register after the directory
//! scan, so an on-disk plugin with the same name takes precedence.

use crate::graphics::backend::Canvas;
use crate::plugin::api::{
    Calibration, Configurable, Lifecycle, PluginModule, RenderTask, SampleSink, SampleSource,
    SampleStage,
};
use crate::plugin::{encode_version, Plugin, PluginInfo, PluginRegistry};
use crate::sync::CancelToken;
use crate::types::{CalibrationPoint, Eye, EyeSample, RenderContext, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Register every built-in module. Existing names win.
pub fn register_builtins(registry: &PluginRegistry) {
    let builtins: [(&str, &str, Box<dyn PluginModule>); 4] = [
        (
            "SyntheticSource",
            "circular smooth-pursuit gaze generator",
            Box::new(SyntheticSource::new()),
        ),
        (
            "MovingAverageFilter",
            "moving-average gaze smoother",
            Box::new(MovingAverageFilter::new()),
        ),
        (
            "LinearCalibration",
            "per-eye offset calibration",
            Box::new(LinearCalibration::new()),
        ),
        (
            "FixationDot",
            "central fixation dot with gaze marker",
            Box::new(FixationDot::new()),
        ),
    ];
    for (name, description, module) in builtins {
        registry.insert(Plugin::from_module(
            module,
            PluginInfo {
                name: name.to_string(),
                author: "reyer".to_string(),
                description: description.to_string(),
                version: encode_version(0, 1, 0),
            },
        ));
    }
}

fn parse_config<T: Default + for<'de> Deserialize<'de>>(config: &str) -> T {
    serde_json::from_str(config).unwrap_or_default()
}

// ---- SyntheticSource ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
struct SyntheticSourceConfig {
    rate_hz: u32,
    amplitude_deg: f32,
    period_s: f32,
}

impl Default for SyntheticSourceConfig {
    fn default() -> Self {
        Self {
            rate_hz: 250,
            amplitude_deg: 5.0,
            period_s: 4.0,
        }
    }
}

struct SyntheticState {
    started: Instant,
    produced: u64,
}

/// Generates binocular samples tracing a circle, paced to the
/// configured rate on the caller's thread.
pub struct SyntheticSource {
    config: Mutex<SyntheticSourceConfig>,
    state: Mutex<SyntheticState>,
    cancelled: AtomicBool,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(SyntheticSourceConfig::default()),
            state: Mutex::new(SyntheticState {
                started: Instant::now(),
                produced: 0,
            }),
            cancelled: AtomicBool::new(false),
        }
    }
}

impl SampleSource for SyntheticSource {
    fn wait_for_sample(&self, out: &mut EyeSample, stop: &CancelToken) -> bool {
        let config = *self.config.lock().expect("source poisoned");
        let interval = Duration::from_nanos(1_000_000_000 / config.rate_hz.max(1) as u64);

        // Sleep in short slices so cancellation stays prompt.
        let deadline = Instant::now() + interval;
        while Instant::now() < deadline {
            if self.cancelled.load(Ordering::SeqCst) || stop.is_cancelled() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1).min(interval));
        }
        if self.cancelled.load(Ordering::SeqCst) || stop.is_cancelled() {
            return false;
        }

        let mut state = self.state.lock().expect("source poisoned");
        state.produced += 1;
        let t = state.started.elapsed().as_secs_f32();
        let phase = t / config.period_s.max(0.001) * std::f32::consts::TAU;
        let gaze = Vec2::new(
            config.amplitude_deg * phase.cos(),
            config.amplitude_deg * phase.sin(),
        );

        *out = EyeSample::default();
        out.timestamp = state.started.elapsed().as_micros() as u64;
        for eye in [&mut out.left, &mut out.right] {
            eye.gaze.raw = gaze;
            eye.gaze.filtered = gaze;
            eye.is_valid = true;
        }
        true
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Lifecycle for SyntheticSource {
    fn init(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().expect("source poisoned");
        state.started = Instant::now();
        state.produced = 0;
    }

    fn shutdown(&self) {
        self.cancel();
    }

    fn reset(&self) {
        self.init();
    }
}

impl Configurable for SyntheticSource {
    fn config_schema(&self) -> String {
        r#"{"type":"object","properties":{"rate_hz":{"type":"integer","minimum":1},"amplitude_deg":{"type":"number"},"period_s":{"type":"number"}}}"#
            .to_string()
    }

    fn default_config(&self) -> String {
        serde_json::to_string(&SyntheticSourceConfig::default()).unwrap_or_default()
    }

    fn set_config_str(&self, config: &str) {
        *self.config.lock().expect("source poisoned") = parse_config(config);
    }
}

impl PluginModule for SyntheticSource {
    fn as_source(&self) -> Option<&dyn SampleSource> {
        Some(self)
    }
    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(self)
    }
}

// ---- MovingAverageFilter ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
struct MovingAverageConfig {
    window: usize,
}

impl Default for MovingAverageConfig {
    fn default() -> Self {
        Self { window: 5 }
    }
}

#[derive(Default)]
struct AverageWindow {
    left: VecDeque<Vec2>,
    right: VecDeque<Vec2>,
}

/// Writes the windowed mean of the raw gaze into the filtered field.
pub struct MovingAverageFilter {
    config: Mutex<MovingAverageConfig>,
    window: Mutex<AverageWindow>,
}

impl MovingAverageFilter {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(MovingAverageConfig::default()),
            window: Mutex::new(AverageWindow::default()),
        }
    }
}

fn windowed_mean(window: &mut VecDeque<Vec2>, next: Vec2, capacity: usize) -> Vec2 {
    window.push_back(next);
    while window.len() > capacity.max(1) {
        window.pop_front();
    }
    let n = window.len() as f32;
    let sum = window
        .iter()
        .fold(Vec2::default(), |acc, v| Vec2::new(acc.x + v.x, acc.y + v.y));
    Vec2::new(sum.x / n, sum.y / n)
}

impl SampleStage for MovingAverageFilter {
    fn process(&self, sample: &mut EyeSample) {
        let capacity = self.config.lock().expect("filter poisoned").window;
        let mut window = self.window.lock().expect("filter poisoned");
        sample.left.gaze.filtered = windowed_mean(&mut window.left, sample.left.gaze.raw, capacity);
        sample.right.gaze.filtered =
            windowed_mean(&mut window.right, sample.right.gaze.raw, capacity);
    }
}

impl Lifecycle for MovingAverageFilter {
    fn init(&self) {
        let mut window = self.window.lock().expect("filter poisoned");
        window.left.clear();
        window.right.clear();
    }

    fn shutdown(&self) {}

    fn reset(&self) {
        self.init();
    }
}

impl Configurable for MovingAverageFilter {
    fn config_schema(&self) -> String {
        r#"{"type":"object","properties":{"window":{"type":"integer","minimum":1}}}"#.to_string()
    }

    fn default_config(&self) -> String {
        serde_json::to_string(&MovingAverageConfig::default()).unwrap_or_default()
    }

    fn set_config_str(&self, config: &str) {
        *self.config.lock().expect("filter poisoned") = parse_config(config);
    }
}

impl PluginModule for MovingAverageFilter {
    fn as_stage(&self) -> Option<&dyn SampleStage> {
        Some(self)
    }
    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(self)
    }
}

// ---- LinearCalibration ----

#[derive(Default)]
struct EyeOffsets {
    left: Vec2,
    right: Vec2,
}

/// Learns a per-eye constant offset from pushed control/measured pairs
/// and applies it to the raw gaze.
pub struct LinearCalibration {
    offsets: Mutex<EyeOffsets>,
}

impl LinearCalibration {
    pub fn new() -> Self {
        Self {
            offsets: Mutex::new(EyeOffsets::default()),
        }
    }
}

impl Calibration for LinearCalibration {
    fn push_points(&self, points: &[CalibrationPoint]) {
        let mut sums = [(Vec2::default(), 0u32); 2];
        for point in points {
            let slot = &mut sums[point.eye as usize];
            slot.0.x += point.control.x - point.measured.x;
            slot.0.y += point.control.y - point.measured.y;
            slot.1 += 1;
        }

        let mut offsets = self.offsets.lock().expect("calibration poisoned");
        if sums[Eye::Left as usize].1 > 0 {
            let (sum, n) = sums[Eye::Left as usize];
            offsets.left = Vec2::new(sum.x / n as f32, sum.y / n as f32);
        }
        if sums[Eye::Right as usize].1 > 0 {
            let (sum, n) = sums[Eye::Right as usize];
            offsets.right = Vec2::new(sum.x / n as f32, sum.y / n as f32);
        }
    }

    fn calibrate(&self, sample: &mut EyeSample) {
        let offsets = self.offsets.lock().expect("calibration poisoned");
        sample.left.gaze.raw.x += offsets.left.x;
        sample.left.gaze.raw.y += offsets.left.y;
        sample.right.gaze.raw.x += offsets.right.x;
        sample.right.gaze.raw.y += offsets.right.y;
    }
}

impl Lifecycle for LinearCalibration {
    fn init(&self) {
        *self.offsets.lock().expect("calibration poisoned") = EyeOffsets::default();
    }

    fn shutdown(&self) {}

    fn reset(&self) {
        self.init();
    }
}

impl PluginModule for LinearCalibration {
    fn as_calibration(&self) -> Option<&dyn Calibration> {
        Some(self)
    }
    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
}

// ---- FixationDot ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
struct FixationDotConfig {
    duration_ms: u64,
    dot_radius_px: f32,
    show_gaze: bool,
}

impl Default for FixationDotConfig {
    fn default() -> Self {
        Self {
            duration_ms: 5_000,
            dot_radius_px: 8.0,
            show_gaze: true,
        }
    }
}

struct FixationState {
    started: Option<Instant>,
    context: Option<RenderContext>,
    last_gaze: Option<Vec2>,
}

/// Central fixation dot; optionally echoes the viewer's filtered gaze.
/// Finishes after the configured duration.
pub struct FixationDot {
    config: Mutex<FixationDotConfig>,
    state: Mutex<FixationState>,
}

impl FixationDot {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(FixationDotConfig::default()),
            state: Mutex::new(FixationState {
                started: None,
                context: None,
                last_gaze: None,
            }),
        }
    }
}

fn fill_circle(canvas: &mut Canvas, center: (f32, f32), radius: f32, rgb: (u8, u8, u8)) {
    use tiny_skia::{FillRule, Paint, PathBuilder, Transform};

    let mut builder = PathBuilder::new();
    builder.push_circle(center.0, center.1, radius);
    let Some(path) = builder.finish() else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color_rgba8(rgb.0, rgb.1, rgb.2, 255);
    paint.anti_alias = canvas.anti_alias();
    canvas
        .pixmap_mut()
        .fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
}

impl RenderTask for FixationDot {
    fn set_render_context(&self, ctx: RenderContext) {
        self.state.lock().expect("render poisoned").context = Some(ctx);
    }

    fn render(&self, canvas: &mut Canvas) {
        let config = *self.config.lock().expect("render poisoned");
        let mut state = self.state.lock().expect("render poisoned");
        if state.started.is_none() {
            state.started = Some(Instant::now());
        }

        let center = (canvas.width() as f32 / 2.0, canvas.height() as f32 / 2.0);
        fill_circle(canvas, center, config.dot_radius_px, (255, 255, 255));

        if config.show_gaze {
            if let (Some(gaze), Some(ctx)) = (state.last_gaze, state.context) {
                // Degrees to pixels through the monitor's PPD.
                let px = (
                    center.0 + gaze.x * ctx.ppd_x as f32,
                    center.1 + gaze.y * ctx.ppd_y as f32,
                );
                fill_circle(canvas, px, config.dot_radius_px / 2.0, (0, 200, 80));
            }
        }
    }

    fn is_finished(&self) -> bool {
        let config = *self.config.lock().expect("render poisoned");
        self.state
            .lock()
            .expect("render poisoned")
            .started
            .map(|started| started.elapsed() >= Duration::from_millis(config.duration_ms))
            .unwrap_or(false)
    }

    fn take_calibration_points(&self) -> Vec<CalibrationPoint> {
        Vec::new()
    }
}

impl SampleSink for FixationDot {
    fn consume(&self, sample: &EyeSample) {
        if sample.left.is_valid {
            self.state.lock().expect("render poisoned").last_gaze =
                Some(sample.left.gaze.filtered);
        }
    }
}

impl Lifecycle for FixationDot {
    fn init(&self) {
        let mut state = self.state.lock().expect("render poisoned");
        state.started = Some(Instant::now());
        state.last_gaze = None;
    }

    fn shutdown(&self) {}

    fn reset(&self) {
        let mut state = self.state.lock().expect("render poisoned");
        state.started = None;
        state.last_gaze = None;
    }
}

impl Configurable for FixationDot {
    fn config_schema(&self) -> String {
        r#"{"type":"object","properties":{"duration_ms":{"type":"integer","minimum":0},"dot_radius_px":{"type":"number"},"show_gaze":{"type":"boolean"}}}"#
            .to_string()
    }

    fn default_config(&self) -> String {
        serde_json::to_string(&FixationDotConfig::default()).unwrap_or_default()
    }

    fn set_config_str(&self, config: &str) {
        *self.config.lock().expect("render poisoned") = parse_config(config);
    }
}

impl PluginModule for FixationDot {
    fn as_render(&self) -> Option<&dyn RenderTask> {
        Some(self)
    }
    fn as_sink(&self) -> Option<&dyn SampleSink> {
        Some(self)
    }
    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(self)
    }
}
