//! Core data types flowing through the runtime.
//!
//! [`EyeSample`] is the unit of data pumped through the pipeline;
//! [`CalibrationPoint`] travels the opposite way, from the active render
//! task into the calibration plugin. [`RenderContext`] is computed once,
//! when the graphics settings are applied, and handed to every render
//! plugin before its init.

use serde::{Deserialize, Serialize};

/// A 2-D float vector. All tracker values are expressed in these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Raw dual-Purkinje measurements for one eye.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DpiData {
    pub p1: Vec2,
    pub p4: Vec2,
    pub pupil_center: Vec2,
    pub pupil_diameter: Vec2,
}

/// Derived gaze values for one eye.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeData {
    pub raw: Vec2,
    pub filtered: Vec2,
    pub velocity: Vec2,
}

/// Full tracker state for one eye.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub dpi: DpiData,
    pub gaze: GazeData,
    pub is_blink: bool,
    pub is_valid: bool,
}

/// One binocular sample. The unit of data flowing through the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EyeSample {
    pub left: Tracker,
    pub right: Tracker,
    /// Acquisition timestamp in microseconds.
    pub timestamp: u64,
}

/// Which eye a calibration point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl From<Eye> for u8 {
    fn from(eye: Eye) -> u8 {
        eye as u8
    }
}

impl TryFrom<u8> for Eye {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Eye::Left),
            1 => Ok(Eye::Right),
            other => Err(format!("invalid eye discriminant: {other}")),
        }
    }
}

/// A control/measured pair produced by a render task and consumed by the
/// active calibration plugin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub control: Vec2,
    pub measured: Vec2,
    pub eye: Eye,
}

/// Immutable view geometry handed to every render plugin before init.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderContext {
    pub view_distance_mm: u32,
    pub monitor_width_mm: u32,
    pub monitor_height_mm: u32,
    /// Pixels per degree of visual angle, horizontal.
    pub ppd_x: f64,
    /// Pixels per degree of visual angle, vertical.
    pub ppd_y: f64,
}

impl RenderContext {
    /// Derive the full context from monitor geometry and view distance.
    pub fn from_geometry(
        width_px: u32,
        height_px: u32,
        monitor_width_mm: u32,
        monitor_height_mm: u32,
        view_distance_mm: u32,
    ) -> Self {
        Self {
            view_distance_mm,
            monitor_width_mm,
            monitor_height_mm,
            ppd_x: pixels_per_degree(width_px, monitor_width_mm, view_distance_mm),
            ppd_y: pixels_per_degree(height_px, monitor_height_mm, view_distance_mm),
        }
    }
}

/// Pixels per degree of visual angle for one axis.
///
/// The monitor subtends `2·atan((size/2)/distance)` degrees; the axis
/// resolution divided by that angle gives the PPD.
pub fn pixels_per_degree(size_px: u32, size_mm: u32, view_distance_mm: u32) -> f64 {
    if size_mm == 0 || view_distance_mm == 0 {
        return 0.0;
    }
    let half = size_mm as f64 / 2.0;
    let degrees = 2.0 * (half / view_distance_mm as f64).atan().to_degrees();
    size_px as f64 / degrees
}
