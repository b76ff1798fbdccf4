//! # Reyer RT: eye-tracking experiment runtime
//!
//! A long-running host process for psychophysical eye-tracking
//! experiments. It drives a graphics task on a selected monitor, pumps
//! eye-tracker samples from a pluggable source through a calibration and
//! stage chain into one or more sinks, records per-task data into an
//! append-only dataset file, and exposes a request/reply plus a
//! publish/subscribe socket for an external controller.
//!
//! ## Architecture
//!
//! - **Plugin registry**: dynamically loaded modules with typed
//!   capability queries (source, stage, sink, calibration, render)
//! - **Pipeline**: a dedicated thread pulling samples through
//!   source → calibration → stages → sinks, reconfigurable while running
//! - **Graphics**: the render loop on the main thread, owning the window
//!   and the active task
//! - **Protocol controller**: sequences tasks through
//!   IDLE → STANDBY → RUNNING → SAVING
//! - **Sockets**: request/reply dispatch and lifecycle broadcasts
//! - **Communication**: crossbeam channels and cancellation tokens;
//!   one thread per component, no async
//!
//! ## Example
//!
//! ```ignore
//! use reyer_rt::{app::App, config::RuntimeConfig};
//!
//! fn main() -> reyer_rt::error::Result<()> {
//!     let config = RuntimeConfig::default();
//!     App::new(config).launch()
//! }
//! ```

pub mod app;
pub mod broadcast;
pub mod config;
pub mod dataset;
pub mod error;
pub mod graphics;
pub mod net;
pub mod pipeline;
pub mod plugin;
pub mod protocol;
pub mod server;
pub mod sync;
pub mod types;
pub mod worker;
pub mod writer;

// Re-export commonly used types
pub use app::App;
pub use config::RuntimeConfig;
pub use error::{Result, RtError};
pub use plugin::{Plugin, PluginRegistry};
pub use types::{CalibrationPoint, EyeSample, RenderContext};
