//! The capability surface plugins implement.
//!
//! A plugin is one opaque module advertising a closed set of typed
//! capabilities. The host never downcasts: it asks for a capability and
//! gets a view or nothing. A renderer that also consumes samples (render
//! tasks typically sink calibration state) is discovered by querying both
//! [`PluginModule::as_render`] and [`PluginModule::as_sink`].
//!
//! Interface identifiers are 64-bit FNV-1a hashes of the interface names
//! and are part of the host-plugin ABI: the constants in [`ids`] must
//! never change value.

use crate::graphics::backend::Canvas;
use crate::sync::CancelToken;
use crate::types::{CalibrationPoint, EyeSample, RenderContext};

/// A stable 64-bit interface identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u64);

/// FNV-1a over the interface name.
pub const fn interface_id(name: &str) -> InterfaceId {
    let bytes = name.as_bytes();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    InterfaceId(hash)
}

/// The closed set of queryable interfaces.
pub mod ids {
    use super::{interface_id, InterfaceId};

    pub const PLUGIN: InterfaceId = interface_id("IPlugin");
    pub const CONFIGURABLE: InterfaceId = interface_id("IConfigurable");
    pub const CALIBRATION: InterfaceId = interface_id("ICalibration");
    pub const RENDER: InterfaceId = interface_id("IRender");
    pub const SOURCE: InterfaceId = interface_id("ISource<core::EyeData>");
    pub const STAGE: InterfaceId = interface_id("IStage<core::EyeData>");
    pub const SINK: InterfaceId = interface_id("ISink<core::EyeData>");
}

/// Lifecycle hooks. Called only on the thread that owns the relevant
/// subsystem (graphics for render tasks, pipeline for everything else).
pub trait Lifecycle: Send + Sync {
    fn init(&self);
    fn shutdown(&self);
    fn pause(&self) {}
    fn resume(&self) {}
    fn reset(&self) {}
}

/// JSON configuration surface.
pub trait Configurable: Send + Sync {
    fn config_schema(&self) -> String;
    fn default_config(&self) -> String;
    fn set_config_str(&self, config: &str);
}

/// Produces samples. `wait_for_sample` is the pipeline thread's only
/// blocking point; `cancel` must wake a blocked wait.
pub trait SampleSource: Send + Sync {
    fn wait_for_sample(&self, out: &mut EyeSample, stop: &CancelToken) -> bool;
    fn cancel(&self);
}

/// Transforms samples in place.
pub trait SampleStage: Send + Sync {
    fn process(&self, sample: &mut EyeSample);
}

/// Receives finished samples.
pub trait SampleSink: Send + Sync {
    fn consume(&self, sample: &EyeSample);
}

/// Optional first transform, fed control/measured pairs by the active
/// render task.
pub trait Calibration: Send + Sync {
    fn push_points(&self, points: &[CalibrationPoint]);
    fn calibrate(&self, sample: &mut EyeSample);
}

/// A render task. All methods are called on the graphics thread, except
/// that the same plugin may concurrently consume samples on the pipeline
/// thread; implementations synchronize internally.
pub trait RenderTask: Send + Sync {
    fn set_render_context(&self, ctx: RenderContext);
    fn render(&self, canvas: &mut Canvas);
    fn is_finished(&self) -> bool;
    /// Drain calibration points collected since the previous call.
    fn take_calibration_points(&self) -> Vec<CalibrationPoint>;
}

/// One loaded plugin module. Capability accessors return None unless the
/// plugin advertises the interface.
pub trait PluginModule: Send + Sync {
    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }
    fn as_configurable(&self) -> Option<&dyn Configurable> {
        None
    }
    fn as_source(&self) -> Option<&dyn SampleSource> {
        None
    }
    fn as_stage(&self) -> Option<&dyn SampleStage> {
        None
    }
    fn as_sink(&self) -> Option<&dyn SampleSink> {
        None
    }
    fn as_calibration(&self) -> Option<&dyn Calibration> {
        None
    }
    fn as_render(&self) -> Option<&dyn RenderTask> {
        None
    }

    /// ABI-level capability probe by interface identifier.
    fn query_interface(&self, id: InterfaceId) -> bool {
        match id {
            ids::PLUGIN => true,
            ids::CONFIGURABLE => self.as_configurable().is_some(),
            ids::CALIBRATION => self.as_calibration().is_some(),
            ids::RENDER => self.as_render().is_some(),
            ids::SOURCE => self.as_source().is_some(),
            ids::STAGE => self.as_stage().is_some(),
            ids::SINK => self.as_sink().is_some(),
            _ => false,
        }
    }
}
