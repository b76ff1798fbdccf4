//! Protocol sequencing: IDLE → STANDBY → RUNNING → SAVING.
//!
//! The controller owns its own thread, the current protocol and the
//! per-run dataset file. It binds tasks to the graphics loop (through
//! the pending-task slot) and to the pipeline (task sink + dataset
//! writer sink). Exactly one task is observable-as-current across
//! controller, graphics and pipeline: switch-over installs the pipeline
//! sinks first, then hands the task to graphics, then broadcasts
//! `TaskStart`; teardown reverses the order and ends with `TaskEnd`.

use crate::broadcast::BroadcastHandle;
use crate::config::DATASET_EXTENSION;
use crate::dataset::DatasetFile;
use crate::error::{Result, RtError};
use crate::graphics::{GraphicsHandle, StandbyInfo};
use crate::net::messages::{
    Command, CurrentTaskInfo, ProtocolEvent, ProtocolEventMessage, ProtocolRequest, RuntimeState,
};
use crate::pipeline::{PipelineHandle, SinkBinding, SinkSlot};
use crate::plugin::{Plugin, PluginRegistry};
use crate::sync::{one_shot, BoundedQueue, CancelToken};
use crate::worker::Worker;
use crate::writer::DataWriter;
use crossbeam_channel::Receiver;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Poll cadence while RUNNING (task-finished checks).
const RUNNING_POLL: Duration = Duration::from_millis(16);
/// Poll cadence in the quiet states.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Controller-internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle = 0,
    Standby = 1,
    Running = 2,
    Saving = 3,
}

impl ControllerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ControllerState::Standby,
            2 => ControllerState::Running,
            3 => ControllerState::Saving,
            _ => ControllerState::Idle,
        }
    }
}

/// A command with its one-shot reply.
struct CommandEnvelope {
    command: Command,
    reply: crossbeam_channel::Sender<Result<()>>,
}

struct ProtocolSlot {
    protocol: Option<ProtocolRequest>,
    updated: bool,
}

struct ProtoShared {
    state: AtomicU8,
    slot: Mutex<ProtocolSlot>,
    commands: BoundedQueue<CommandEnvelope>,
    current_task: Mutex<Option<CurrentTaskInfo>>,
}

/// Clonable control surface over the protocol controller.
#[derive(Clone)]
pub struct ProtocolHandle {
    shared: Arc<ProtoShared>,
}

impl ProtocolHandle {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ProtoShared {
                state: AtomicU8::new(ControllerState::Idle as u8),
                slot: Mutex::new(ProtocolSlot {
                    protocol: None,
                    updated: false,
                }),
                commands: BoundedQueue::new(16),
                current_task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ControllerState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    /// Replace the current protocol. `Busy` while a run is in progress;
    /// the existing protocol is left untouched in that case.
    pub fn set_protocol(&self, protocol: ProtocolRequest) -> Result<()> {
        let mut slot = self.shared.slot.lock().expect("protocol poisoned");
        if self.state() == ControllerState::Running {
            return Err(RtError::Busy("a protocol is running".to_string()));
        }
        tracing::info!("protocol set to \"{}\"", protocol.name);
        slot.protocol = Some(protocol);
        slot.updated = true;
        Ok(())
    }

    /// Queue a command; the receiver resolves when the controller has
    /// acted on it.
    pub fn enqueue_command(&self, command: Command) -> Receiver<Result<()>> {
        let (reply, rx) = one_shot();
        self.shared.commands.push(CommandEnvelope { command, reply });
        rx
    }

    pub fn current_protocol(&self) -> Option<ProtocolRequest> {
        self.shared
            .slot
            .lock()
            .expect("protocol poisoned")
            .protocol
            .clone()
    }

    pub fn current_task(&self) -> Option<CurrentTaskInfo> {
        self.shared
            .current_task
            .lock()
            .expect("protocol poisoned")
            .clone()
    }

    /// The externally observable state, combined with graphics
    /// readiness.
    pub fn runtime_state(&self, graphics_initialized: bool) -> RuntimeState {
        match self.state() {
            ControllerState::Idle => {
                if graphics_initialized {
                    RuntimeState::Standby
                } else {
                    RuntimeState::Default
                }
            }
            ControllerState::Standby => RuntimeState::Standby,
            ControllerState::Running => RuntimeState::Running,
            ControllerState::Saving => RuntimeState::Saving,
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: ControllerState) {
        self.set_state(state);
    }
}

impl Default for ProtocolHandle {
    fn default() -> Self {
        Self::new()
    }
}

enum LoadStep {
    First,
    Next,
    Finish,
}

/// The controller body. Runs as a [`Worker`] on its own thread.
pub struct ProtocolController {
    handle: ProtocolHandle,
    registry: Arc<PluginRegistry>,
    graphics: GraphicsHandle,
    pipeline: PipelineHandle,
    broadcast: BroadcastHandle,
    data_dir: PathBuf,
    task: Option<Plugin>,
    task_index: usize,
    file: Option<DatasetFile>,
    writer: Option<DataWriter>,
}

impl ProtocolController {
    pub fn new(
        handle: ProtocolHandle,
        registry: Arc<PluginRegistry>,
        graphics: GraphicsHandle,
        pipeline: PipelineHandle,
        broadcast: BroadcastHandle,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            handle,
            registry,
            graphics,
            pipeline,
            broadcast,
            data_dir,
            task: None,
            task_index: 0,
            file: None,
            writer: None,
        }
    }

    fn take_updated(&self) -> bool {
        let mut slot = self.handle.shared.slot.lock().expect("protocol poisoned");
        std::mem::take(&mut slot.updated)
    }

    fn protocol(&self) -> Option<ProtocolRequest> {
        self.handle.current_protocol()
    }

    fn self_enqueue(&self, command: Command) {
        let (reply, _rx) = one_shot();
        self.handle
            .shared
            .commands
            .try_push(CommandEnvelope { command, reply });
    }

    fn poll_commands(&mut self) {
        let Some(envelope) = self.handle.shared.commands.try_pop() else {
            return;
        };
        let state = self.handle.state();
        match envelope.command {
            Command::Start => {
                if state == ControllerState::Standby {
                    self.start_run();
                }
            }
            Command::Stop => {
                if state == ControllerState::Running {
                    self.load_task(LoadStep::Finish);
                }
            }
            Command::Next => {
                if state == ControllerState::Running {
                    self.load_task(LoadStep::Next);
                }
            }
            Command::Exit => {
                if state == ControllerState::Running {
                    self.handle.set_state(ControllerState::Saving);
                }
                self.graphics.request_stop();
            }
        }
        let _ = envelope.reply.send(Ok(()));
    }

    fn load_protocol(&mut self) {
        let Some(protocol) = self.protocol() else {
            self.handle.set_state(ControllerState::Idle);
            self.task_index = 0;
            self.graphics.clear_standby_info();
            return;
        };

        self.graphics.set_standby_info(StandbyInfo {
            protocol_name: protocol.name.clone(),
            protocol_uuid: protocol.protocol_uuid.clone(),
        });
        self.handle.set_state(ControllerState::Standby);

        self.broadcast.protocol_event(&ProtocolEventMessage {
            protocol_uuid: String::new(),
            event: ProtocolEvent::ProtocolLoaded,
            data: 0,
            protocol_name: protocol.name.clone(),
            participant_id: protocol.participant_id.clone(),
            notes: protocol.notes.clone(),
            tasks: protocol.tasks.clone(),
            file_path: String::new(),
        });
    }

    fn start_run(&mut self) {
        let uuid = {
            let mut slot = self.handle.shared.slot.lock().expect("protocol poisoned");
            let Some(protocol) = slot.protocol.as_mut() else {
                return;
            };
            if protocol.protocol_uuid.is_empty() {
                protocol.protocol_uuid = uuid::Uuid::new_v4().to_string();
                tracing::info!("generated run UUID: {}", protocol.protocol_uuid);
            }
            protocol.protocol_uuid.clone()
        };

        let path = self.data_dir.join(format!("{uuid}.{DATASET_EXTENSION}"));
        match DatasetFile::create(&path) {
            Ok(file) => self.file = Some(file),
            Err(e) => {
                tracing::error!("cannot create dataset file {}: {e}", path.display());
                return;
            }
        }

        let protocol = self.protocol().unwrap_or_default();
        self.broadcast.protocol_event(&ProtocolEventMessage {
            protocol_uuid: uuid,
            event: ProtocolEvent::ProtocolNew,
            data: 0,
            protocol_name: protocol.name.clone(),
            participant_id: protocol.participant_id.clone(),
            notes: protocol.notes.clone(),
            tasks: protocol.tasks.clone(),
            file_path: path.display().to_string(),
        });

        self.load_task(LoadStep::First);
    }

    fn load_task(&mut self, step: LoadStep) {
        self.cleanup_current_task();

        let Some(protocol) = self.protocol() else {
            return;
        };

        let next_index = match step {
            LoadStep::First => 0,
            LoadStep::Next => self.task_index + 1,
            LoadStep::Finish => protocol.tasks.len(),
        };

        if next_index >= protocol.tasks.len() {
            self.handle.set_state(ControllerState::Saving);
            return;
        }

        let entry = &protocol.tasks[next_index];
        tracing::info!("loading task \"{}\"", entry.name);
        let plugin = match self.registry.get(&entry.name) {
            Ok(plugin) => plugin,
            Err(e) => {
                tracing::error!("failed to load task \"{}\": {e}", entry.name);
                self.handle.set_state(ControllerState::Saving);
                return;
            }
        };
        if plugin.as_render().is_none() {
            tracing::error!("task \"{}\" is not a render plugin", entry.name);
            self.handle.set_state(ControllerState::Saving);
            return;
        }

        if let Some(configurable) = plugin.as_configurable() {
            configurable.set_config_str(&entry.configuration);
        }

        // Pipeline sinks first, then the graphics hand-over, then the
        // broadcast: the switch-over write order.
        if plugin.as_sink().is_some() {
            self.pipeline
                .install_sink(SinkSlot::Task, SinkBinding::Plugin(plugin.clone()));
        }
        if let Some(file) = &self.file {
            let group_name = format!("task_{next_index:03}");
            match file.create_group(&group_name) {
                Ok(group) => {
                    let writer = DataWriter::spawn(group);
                    self.pipeline
                        .install_sink(SinkSlot::Writer, SinkBinding::Shared(writer.sink()));
                    self.writer = Some(writer);
                }
                Err(e) => tracing::error!("cannot create dataset group {group_name}: {e}"),
            }
        }

        self.graphics.set_pending_task(plugin.clone());

        *self
            .handle
            .shared
            .current_task
            .lock()
            .expect("protocol poisoned") = Some(CurrentTaskInfo {
            index: next_index,
            name: entry.name.clone(),
        });
        self.task = Some(plugin);
        self.task_index = next_index;

        self.broadcast.protocol_event(&ProtocolEventMessage::task(
            ProtocolEvent::TaskStart,
            &protocol.protocol_uuid,
            next_index,
        ));

        self.handle.set_state(ControllerState::Running);
    }

    fn cleanup_current_task(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        self.pipeline.remove_sink(SinkSlot::Task);
        self.pipeline.remove_sink(SinkSlot::Writer);
        if let Some(writer) = self.writer.take() {
            writer.stop();
        }
        self.graphics.clear_task();

        // When the render loop is stopping it tears the task down
        // itself, on the thread that owns the GPU context.
        if !self.graphics.stop_requested() {
            tracing::info!("shutting down task \"{}\"", task.name());
            if let Some(lifecycle) = task.as_lifecycle() {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    lifecycle.reset();
                    lifecycle.shutdown();
                }));
                if outcome.is_err() {
                    tracing::error!("task \"{}\" panicked during shutdown", task.name());
                }
            }
        }

        *self
            .handle
            .shared
            .current_task
            .lock()
            .expect("protocol poisoned") = None;

        let uuid = self
            .protocol()
            .map(|p| p.protocol_uuid)
            .unwrap_or_default();
        self.broadcast.protocol_event(&ProtocolEventMessage::task(
            ProtocolEvent::TaskEnd,
            &uuid,
            self.task_index,
        ));
    }

    fn finish_run(&mut self) {
        tracing::info!("saving data");
        self.cleanup_current_task();
        if let Some(file) = self.file.take() {
            if let Err(e) = file.flush() {
                tracing::error!("dataset flush failed: {e}");
            }
        }
        self.task_index = 0;
        self.handle.set_state(ControllerState::Standby);
        tracing::info!("saving complete");
    }
}

impl Worker for ProtocolController {
    fn init(&mut self) -> Result<()> {
        self.handle.set_state(ControllerState::Idle);
        Ok(())
    }

    fn run_once(&mut self, _stop: &CancelToken) -> Result<()> {
        self.poll_commands();

        match self.handle.state() {
            ControllerState::Idle => {
                if self.take_updated() {
                    self.load_protocol();
                } else {
                    std::thread::sleep(IDLE_POLL);
                }
            }
            ControllerState::Standby => {
                if self.take_updated() {
                    self.load_protocol();
                }
                if self.graphics.consume_start_request() {
                    self.self_enqueue(Command::Start);
                }
                std::thread::sleep(IDLE_POLL);
            }
            ControllerState::Running => {
                if self.graphics.consume_task_failure() {
                    tracing::error!("current task faulted; ending the run");
                    self.load_task(LoadStep::Finish);
                } else if self.graphics.is_current_task_finished() {
                    self.self_enqueue(Command::Next);
                }
                std::thread::sleep(RUNNING_POLL);
            }
            ControllerState::Saving => {
                self.finish_run();
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.cleanup_current_task();
        if let Some(file) = self.file.take() {
            let _ = file.flush();
        }
        // Dropping queued commands disconnects their reply channels, so
        // blocked requesters fail instead of hanging.
        while self.handle.shared.commands.try_pop().is_some() {}
    }
}
