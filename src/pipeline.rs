//! The sample pipeline: source → optional calibration → stages → sinks.
//!
//! The engine owns a dedicated thread. All topology lives behind one
//! mutex; the pump snapshots the source, blocks in `wait_for_sample`
//! *outside* the lock, then re-acquires it to process. Every topology
//! mutation bumps an epoch counter, and the pump drops any sample whose
//! snapshot epoch no longer matches. A topology never sees a sample
//! produced before its installation, and a cancelled source's in-flight
//! sample never reaches the sinks that replaced it.
//!
//! Plugin `init` is deferred to the pipeline thread (a pending list
//! drained at the top of each iteration), because sources typically
//! start their producer threads from `init` and expect to run on the
//! thread that will call them.

use crate::error::{Result, RtError};
use crate::plugin::Plugin;
use crate::sync::CancelToken;
use crate::types::{CalibrationPoint, EyeSample};
use crate::worker::Worker;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Idle backoff while no source is installed.
const NO_SOURCE_BACKOFF: Duration = Duration::from_millis(10);

/// Identifies a sink slot so the controller can replace or remove sinks
/// independently of the source/stage topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkSlot {
    /// The active render task (render tasks sink calibration state).
    Task,
    /// The dataset writer attached to the active task.
    Writer,
}

/// A sink installed into the pipeline: either a plugin or a host object.
#[derive(Clone)]
pub enum SinkBinding {
    Plugin(Plugin),
    Shared(Arc<dyn crate::plugin::SampleSink>),
}

impl SinkBinding {
    fn consume(&self, sample: &EyeSample) {
        match self {
            SinkBinding::Plugin(plugin) => {
                if let Some(sink) = plugin.as_sink() {
                    sink.consume(sample);
                }
            }
            SinkBinding::Shared(sink) => sink.consume(sample),
        }
    }
}

struct Topology {
    source: Option<Plugin>,
    calibration: Option<Plugin>,
    stages: Vec<Plugin>,
    sinks: Vec<(SinkSlot, SinkBinding)>,
    /// Plugins whose `init` must run on the pipeline thread.
    pending_init: Vec<Plugin>,
    /// Bumped on every mutation; the pump drops stale samples.
    epoch: u64,
}

/// Shared, clonable control surface over the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    topology: Arc<Mutex<Topology>>,
}

impl PipelineHandle {
    pub fn new() -> Self {
        Self {
            topology: Arc::new(Mutex::new(Topology {
                source: None,
                calibration: None,
                stages: Vec::new(),
                sinks: Vec::new(),
                pending_init: Vec::new(),
                epoch: 0,
            })),
        }
    }

    /// Replace source, calibration and stage chain atomically.
    ///
    /// The old source is cancelled before the lock is taken so a blocked
    /// pump wakes; the outgoing plugins are shut down in reverse
    /// dependency order (stages → calibration → source); the incoming
    /// ones are initialized later, on the pipeline thread. Sinks are
    /// untouched.
    pub fn configure(
        &self,
        source: Option<Plugin>,
        calibration: Option<Plugin>,
        stages: Vec<Plugin>,
    ) -> Result<()> {
        if let Some(plugin) = &source {
            if plugin.as_source().is_none() {
                return Err(RtError::InvalidArgument(format!(
                    "plugin \"{}\" is not a source",
                    plugin.name()
                )));
            }
        }
        if let Some(plugin) = &calibration {
            if plugin.as_calibration().is_none() {
                return Err(RtError::InvalidArgument(format!(
                    "plugin \"{}\" is not a calibration",
                    plugin.name()
                )));
            }
        }
        for plugin in &stages {
            if plugin.as_stage().is_none() {
                return Err(RtError::InvalidArgument(format!(
                    "plugin \"{}\" is not a stage",
                    plugin.name()
                )));
            }
        }

        let old_source = {
            let topology = self.topology.lock().expect("pipeline poisoned");
            topology.source.clone()
        };
        if let Some(plugin) = &old_source {
            if let Some(src) = plugin.as_source() {
                src.cancel();
            }
        }

        let mut topology = self.topology.lock().expect("pipeline poisoned");
        for plugin in topology.stages.drain(..).rev() {
            shutdown_plugin(&plugin);
        }
        if let Some(plugin) = topology.calibration.take() {
            shutdown_plugin(&plugin);
        }
        if let Some(plugin) = topology.source.take() {
            shutdown_plugin(&plugin);
        }

        topology.pending_init.clear();
        if let Some(plugin) = &source {
            topology.pending_init.push(plugin.clone());
        }
        if let Some(plugin) = &calibration {
            topology.pending_init.push(plugin.clone());
        }
        topology.pending_init.extend(stages.iter().cloned());

        topology.source = source;
        topology.calibration = calibration;
        topology.stages = stages;
        topology.epoch += 1;

        tracing::info!(
            "pipeline configured: source={:?} calibration={:?} stages={}",
            topology.source.as_ref().map(|p| p.name().to_string()),
            topology.calibration.as_ref().map(|p| p.name().to_string()),
            topology.stages.len(),
        );
        Ok(())
    }

    /// Tear down the whole source/stage topology. Sinks are untouched.
    pub fn clear(&self) {
        let _ = self.configure(None, None, Vec::new());
    }

    /// Install or replace the sink in `slot`.
    pub fn install_sink(&self, slot: SinkSlot, binding: SinkBinding) {
        let mut topology = self.topology.lock().expect("pipeline poisoned");
        topology.sinks.retain(|(existing, _)| *existing != slot);
        topology.sinks.push((slot, binding));
        topology.epoch += 1;
    }

    /// Remove the sink in `slot`, if any. The pipeline does not manage
    /// sink lifecycle; the owner shuts plugins down itself.
    pub fn remove_sink(&self, slot: SinkSlot) {
        let mut topology = self.topology.lock().expect("pipeline poisoned");
        let before = topology.sinks.len();
        topology.sinks.retain(|(existing, _)| *existing != slot);
        if topology.sinks.len() != before {
            topology.epoch += 1;
        }
    }

    /// Forward calibration points from the render side to the current
    /// calibration. Takes effect on subsequent samples only.
    pub fn push_calibration_points(&self, points: &[CalibrationPoint]) {
        let topology = self.topology.lock().expect("pipeline poisoned");
        if let Some(plugin) = &topology.calibration {
            if let Some(calibration) = plugin.as_calibration() {
                calibration.push_points(points);
            }
        }
    }

    pub fn has_source(&self) -> bool {
        self.topology
            .lock()
            .expect("pipeline poisoned")
            .source
            .is_some()
    }

    pub fn stage_count(&self) -> usize {
        self.topology
            .lock()
            .expect("pipeline poisoned")
            .stages
            .len()
    }

    pub fn sink_count(&self) -> usize {
        self.topology.lock().expect("pipeline poisoned").sinks.len()
    }
}

impl Default for PipelineHandle {
    fn default() -> Self {
        Self::new()
    }
}

fn shutdown_plugin(plugin: &Plugin) {
    if let Some(lifecycle) = plugin.as_lifecycle() {
        let outcome = catch_unwind(AssertUnwindSafe(|| lifecycle.shutdown()));
        if outcome.is_err() {
            tracing::error!("plugin \"{}\" panicked during shutdown", plugin.name());
        }
    }
}

/// The pump body. Runs as a [`Worker`] on the pipeline thread.
pub struct PipelineEngine {
    handle: PipelineHandle,
}

impl PipelineEngine {
    pub fn new(handle: PipelineHandle) -> Self {
        Self { handle }
    }

    fn drain_pending_init(&self) {
        let pending = {
            let mut topology = self.handle.topology.lock().expect("pipeline poisoned");
            std::mem::take(&mut topology.pending_init)
        };
        for plugin in pending {
            if let Some(lifecycle) = plugin.as_lifecycle() {
                let outcome = catch_unwind(AssertUnwindSafe(|| lifecycle.init()));
                if outcome.is_err() {
                    tracing::error!("plugin \"{}\" panicked during init", plugin.name());
                }
            }
        }
    }
}

impl Worker for PipelineEngine {
    fn run_once(&mut self, stop: &CancelToken) -> Result<()> {
        self.drain_pending_init();

        let (source, epoch) = {
            let topology = self.handle.topology.lock().expect("pipeline poisoned");
            (topology.source.clone(), topology.epoch)
        };
        let Some(source) = source else {
            std::thread::sleep(NO_SOURCE_BACKOFF);
            return Ok(());
        };
        let Some(src) = source.as_source() else {
            std::thread::sleep(NO_SOURCE_BACKOFF);
            return Ok(());
        };

        let mut sample = EyeSample::default();
        if !src.wait_for_sample(&mut sample, stop) {
            // Cancelled: either reconfiguration or global stop.
            return Ok(());
        }

        let topology = self.handle.topology.lock().expect("pipeline poisoned");
        if topology.epoch != epoch {
            // Topology changed while we were blocked; this sample belongs
            // to the old world.
            return Ok(());
        }

        if let Some(plugin) = &topology.calibration {
            if let Some(calibration) = plugin.as_calibration() {
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| calibration.calibrate(&mut sample)));
                if outcome.is_err() {
                    tracing::error!("calibration \"{}\" panicked; sample passed on", plugin.name());
                }
            }
        }

        for plugin in &topology.stages {
            if let Some(stage) = plugin.as_stage() {
                let outcome = catch_unwind(AssertUnwindSafe(|| stage.process(&mut sample)));
                if outcome.is_err() {
                    tracing::error!("stage \"{}\" panicked; stage skipped", plugin.name());
                }
            }
        }

        for (slot, binding) in &topology.sinks {
            let outcome = catch_unwind(AssertUnwindSafe(|| binding.consume(&sample)));
            if outcome.is_err() {
                tracing::error!("sink {slot:?} panicked; sink skipped");
            }
        }

        Ok(())
    }

    fn shutdown(&mut self) {
        self.handle.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::api::{PluginModule, SampleSink, SampleSource, SampleStage};
    use crate::plugin::PluginInfo;
    use crate::sync::CancelSource;

    struct NullSource;
    impl SampleSource for NullSource {
        fn wait_for_sample(&self, _out: &mut EyeSample, _stop: &CancelToken) -> bool {
            false
        }
        fn cancel(&self) {}
    }
    impl PluginModule for NullSource {
        fn as_source(&self) -> Option<&dyn SampleSource> {
            Some(self)
        }
    }

    struct NullStage;
    impl SampleStage for NullStage {
        fn process(&self, _sample: &mut EyeSample) {}
    }
    impl PluginModule for NullStage {
        fn as_stage(&self) -> Option<&dyn SampleStage> {
            Some(self)
        }
    }

    struct NullSink;
    impl SampleSink for NullSink {
        fn consume(&self, _sample: &EyeSample) {}
    }
    impl PluginModule for NullSink {
        fn as_sink(&self) -> Option<&dyn SampleSink> {
            Some(self)
        }
    }

    fn plugin(name: &str, module: Box<dyn PluginModule>) -> Plugin {
        Plugin::from_module(
            module,
            PluginInfo {
                name: name.to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_configure_rejects_wrong_capability() {
        let handle = PipelineHandle::new();
        let not_a_source = plugin("Stage", Box::new(NullStage));
        let err = handle.configure(Some(not_a_source), None, Vec::new());
        assert!(matches!(err, Err(RtError::InvalidArgument(_))));
        assert!(!handle.has_source());
    }

    #[test]
    fn test_configure_installs_topology() {
        let handle = PipelineHandle::new();
        handle
            .configure(
                Some(plugin("Src", Box::new(NullSource))),
                None,
                vec![
                    plugin("A", Box::new(NullStage)),
                    plugin("B", Box::new(NullStage)),
                ],
            )
            .unwrap();
        assert!(handle.has_source());
        assert_eq!(handle.stage_count(), 2);
    }

    #[test]
    fn test_sink_slots_replace_and_remove() {
        let handle = PipelineHandle::new();
        handle.install_sink(
            SinkSlot::Task,
            SinkBinding::Plugin(plugin("T1", Box::new(NullSink))),
        );
        handle.install_sink(
            SinkSlot::Writer,
            SinkBinding::Shared(Arc::new(NullSink)),
        );
        assert_eq!(handle.sink_count(), 2);

        // Re-installing the task slot replaces, not accumulates.
        handle.install_sink(
            SinkSlot::Task,
            SinkBinding::Plugin(plugin("T2", Box::new(NullSink))),
        );
        assert_eq!(handle.sink_count(), 2);

        handle.remove_sink(SinkSlot::Task);
        handle.remove_sink(SinkSlot::Writer);
        assert_eq!(handle.sink_count(), 0);
    }

    #[test]
    fn test_cancelled_source_produces_no_downstream_calls() {
        struct CountingSink(std::sync::atomic::AtomicU32);
        impl SampleSink for CountingSink {
            fn consume(&self, _sample: &EyeSample) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let handle = PipelineHandle::new();
        handle
            .configure(Some(plugin("Src", Box::new(NullSource))), None, Vec::new())
            .unwrap();
        let sink = Arc::new(CountingSink(std::sync::atomic::AtomicU32::new(0)));
        handle.install_sink(SinkSlot::Task, SinkBinding::Shared(sink.clone()));

        let stop = CancelSource::new();
        let mut engine = PipelineEngine::new(handle);
        // The source refuses every wait, as a source under cancellation
        // does; nothing may reach the sink.
        for _ in 0..5 {
            engine.run_once(&stop.token()).unwrap();
        }
        assert_eq!(sink.0.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
