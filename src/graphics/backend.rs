//! The windowing seam.
//!
//! The render loop talks to a [`WindowBackend`] trait so the loop logic
//! stays testable without a display: production uses the winit/pixels
//! implementation, tests use [`HeadlessBackend`] with scripted input.

use crate::error::{Result, RtError};
use crate::net::messages::{GraphicsSettings, MonitorInfo};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiny_skia::{Color, Pixmap};

/// The drawing surface handed to render plugins each frame.
pub struct Canvas {
    pixmap: Pixmap,
    anti_alias: bool,
}

impl Canvas {
    pub fn new(width: u32, height: u32, anti_alias: bool) -> Result<Self> {
        let pixmap = Pixmap::new(width, height).ok_or_else(|| {
            RtError::InvalidArgument(format!("invalid canvas size {width}x{height}"))
        })?;
        Ok(Self { pixmap, anti_alias })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Whether plugins should draw with anti-aliasing.
    pub fn anti_alias(&self) -> bool {
        self.anti_alias
    }

    pub fn clear(&mut self, r: u8, g: u8, b: u8) {
        self.pixmap.fill(Color::from_rgba8(r, g, b, 255));
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }
}

/// Input gathered once per frame.
#[derive(Debug, Default, Clone)]
pub struct FrameInput {
    pub close_requested: bool,
    /// Characters pressed since the previous poll, lowercase.
    pub keys: Vec<char>,
}

/// Result of opening the window.
#[derive(Debug, Clone)]
pub struct OpenedWindow {
    pub width: u32,
    pub height: u32,
    pub monitor: MonitorInfo,
}

/// Everything the render loop needs from a windowing layer.
pub trait WindowBackend {
    /// Enumerate attached monitors. Called once, before any window.
    fn probe_monitors(&mut self) -> Result<Vec<MonitorInfo>>;

    /// Create the window. Called at most once per process.
    fn open(&mut self, settings: &GraphicsSettings, title: &str) -> Result<OpenedWindow>;

    /// Drain pending window events.
    fn poll_input(&mut self) -> FrameInput;

    /// Begin a frame. None when the window is gone.
    fn begin_frame(&mut self) -> Option<&mut Canvas>;

    /// Present the frame, pacing to the configured rate.
    fn end_frame(&mut self) -> Result<()>;

    fn set_title(&mut self, title: &str);

    /// Destroy the window and its surfaces.
    fn close(&mut self);
}

#[derive(Default)]
struct HeadlessScript {
    close_requested: AtomicBool,
    keys: Mutex<VecDeque<char>>,
    frames: AtomicU64,
}

/// Test driver for a [`HeadlessBackend`].
#[derive(Clone)]
pub struct HeadlessControl {
    script: Arc<HeadlessScript>,
}

impl HeadlessControl {
    /// Simulate the window close button.
    pub fn request_close(&self) {
        self.script.close_requested.store(true, Ordering::SeqCst);
    }

    /// Simulate a key press delivered on the next poll.
    pub fn press_key(&self, key: char) {
        self.script
            .keys
            .lock()
            .expect("headless script poisoned")
            .push_back(key);
    }

    /// Frames presented so far.
    pub fn frames(&self) -> u64 {
        self.script.frames.load(Ordering::SeqCst)
    }
}

/// In-memory backend with scripted input.
pub struct HeadlessBackend {
    monitors: Vec<MonitorInfo>,
    canvas: Option<Canvas>,
    script: Arc<HeadlessScript>,
    frame_time: Duration,
}

impl HeadlessBackend {
    pub fn new() -> (Self, HeadlessControl) {
        let monitors = vec![MonitorInfo {
            index: 0,
            width_px: 1920,
            height_px: 1080,
            width_mm: 520,
            height_mm: 290,
            refresh_rate: 60,
            name: "headless".to_string(),
        }];
        let script = Arc::new(HeadlessScript::default());
        (
            Self {
                monitors,
                canvas: None,
                script: Arc::clone(&script),
                frame_time: Duration::from_millis(1),
            },
            HeadlessControl { script },
        )
    }
}

impl WindowBackend for HeadlessBackend {
    fn probe_monitors(&mut self) -> Result<Vec<MonitorInfo>> {
        Ok(self.monitors.clone())
    }

    fn open(&mut self, settings: &GraphicsSettings, _title: &str) -> Result<OpenedWindow> {
        let monitor = self
            .monitors
            .get(settings.monitor_index)
            .cloned()
            .ok_or_else(|| {
                RtError::InvalidArgument(format!("no monitor {}", settings.monitor_index))
            })?;
        self.canvas = Some(Canvas::new(
            settings.width,
            settings.height,
            settings.anti_aliasing,
        )?);
        Ok(OpenedWindow {
            width: settings.width,
            height: settings.height,
            monitor,
        })
    }

    fn poll_input(&mut self) -> FrameInput {
        let keys = self
            .script
            .keys
            .lock()
            .expect("headless script poisoned")
            .drain(..)
            .collect();
        FrameInput {
            close_requested: self.script.close_requested.load(Ordering::SeqCst),
            keys,
        }
    }

    fn begin_frame(&mut self) -> Option<&mut Canvas> {
        self.canvas.as_mut()
    }

    fn end_frame(&mut self) -> Result<()> {
        self.script.frames.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.frame_time);
        Ok(())
    }

    fn set_title(&mut self, _title: &str) {}

    fn close(&mut self) {
        self.canvas = None;
    }
}
