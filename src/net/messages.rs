//! Wire message types.
//!
//! Requests carry no discriminator: each variant has a distinctive field
//! set, and [`Request`] decodes by shape. Enumerations travel as their
//! underlying integers. Every request is answered with exactly one
//! [`Response`], including error paths.

use crate::error::RtError;
use serde::{Deserialize, Serialize};

/// Liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: u64,
}

/// Reply payload for [`Ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: u64,
}

/// Operator commands accepted by the protocol controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Command {
    Start = 0,
    Stop = 1,
    Next = 2,
    Exit = 3,
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Start),
            1 => Ok(Command::Stop),
            2 => Ok(Command::Next),
            3 => Ok(Command::Exit),
            other => Err(format!("invalid command discriminant: {other}")),
        }
    }
}

/// Envelope a controller sends to drive the protocol state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub origin: String,
    pub destination: String,
    pub command: Command,
}

/// Window and presentation settings, applied exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphicsSettings {
    pub monitor_index: usize,
    pub vsync: bool,
    pub full_screen: bool,
    pub anti_aliasing: bool,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            monitor_index: 0,
            vsync: true,
            full_screen: false,
            anti_aliasing: false,
            target_fps: 60,
            width: 1920,
            height: 1080,
        }
    }
}

/// One attached monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub index: usize,
    pub width_px: u32,
    pub height_px: u32,
    pub width_mm: u32,
    pub height_mm: u32,
    pub refresh_rate: u32,
    pub name: String,
}

/// Request to initialize graphics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphicsSettingsRequest {
    pub graphics_settings: GraphicsSettings,
    pub view_distance_mm: u32,
}

/// One task inside a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub name: String,
    /// JSON configuration string handed to the plugin verbatim.
    #[serde(default)]
    pub configuration: String,
}

/// An ordered run of tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRequest {
    pub name: String,
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub notes: String,
    pub tasks: Vec<TaskEntry>,
    /// Assigned on START when left empty.
    #[serde(default)]
    pub protocol_uuid: String,
}

/// Pipeline topology by plugin name. The sink is never part of this;
/// it is bound by the protocol controller to the active task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfigRequest {
    pub source: String,
    #[serde(default)]
    pub calibration: Option<String>,
    #[serde(default)]
    pub stages: Vec<String>,
}

/// Observable resources a controller can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ResourceCode {
    RuntimeState = 0,
    Monitors = 1,
    Sources = 2,
    Stages = 3,
    Sinks = 4,
    Tasks = 5,
    GraphicsSettings = 6,
    Protocol = 7,
    CurrentTask = 8,
    Calibrations = 9,
}

impl From<ResourceCode> for u32 {
    fn from(code: ResourceCode) -> u32 {
        code as u32
    }
}

impl TryFrom<u32> for ResourceCode {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ResourceCode::RuntimeState),
            1 => Ok(ResourceCode::Monitors),
            2 => Ok(ResourceCode::Sources),
            3 => Ok(ResourceCode::Stages),
            4 => Ok(ResourceCode::Sinks),
            5 => Ok(ResourceCode::Tasks),
            6 => Ok(ResourceCode::GraphicsSettings),
            7 => Ok(ResourceCode::Protocol),
            8 => Ok(ResourceCode::CurrentTask),
            9 => Ok(ResourceCode::Calibrations),
            other => Err(format!("invalid resource code: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub resource_code: ResourceCode,
}

/// The externally observable runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RuntimeState {
    Default = 0,
    Standby = 1,
    Running = 2,
    Saving = 3,
}

impl From<RuntimeState> for u8 {
    fn from(state: RuntimeState) -> u8 {
        state as u8
    }
}

impl TryFrom<u8> for RuntimeState {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(RuntimeState::Default),
            1 => Ok(RuntimeState::Standby),
            2 => Ok(RuntimeState::Running),
            3 => Ok(RuntimeState::Saving),
            other => Err(format!("invalid runtime state: {other}")),
        }
    }
}

/// Plugin metadata served by the resource queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginListing {
    pub name: String,
    pub author: String,
    pub description: String,
    pub version: u32,
    pub configuration_schema: String,
    pub default_configuration: String,
}

/// Currently active task, when one is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentTaskInfo {
    pub index: usize,
    pub name: String,
}

/// Every request decodes into one of these, by field shape. Variant
/// order matters: more distinctive shapes come first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Request {
    GraphicsSettings(GraphicsSettingsRequest),
    Protocol(ProtocolRequest),
    PipelineConfig(PipelineConfigRequest),
    Command(CommandRequest),
    Resource(ResourceRequest),
    Ping(Ping),
}

/// Reply to every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub error_code: i32,
    pub error_message: String,
    pub payload: String,
}

impl Response {
    pub fn ok(payload: String) -> Self {
        Self {
            success: true,
            error_code: 0,
            error_message: String::new(),
            payload,
        }
    }

    pub fn error(err: &RtError) -> Self {
        Self {
            success: false,
            error_code: err.code(),
            error_message: err.to_string(),
            payload: String::new(),
        }
    }
}

/// Broadcast channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BroadcastTopic {
    Log = 0,
    Protocol = 1,
}

impl From<BroadcastTopic> for u8 {
    fn from(topic: BroadcastTopic) -> u8 {
        topic as u8
    }
}

impl TryFrom<u8> for BroadcastTopic {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(BroadcastTopic::Log),
            1 => Ok(BroadcastTopic::Protocol),
            other => Err(format!("invalid broadcast topic: {other}")),
        }
    }
}

/// Lifecycle events published on the broadcast socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolEvent {
    GraphicsReady = 0,
    ProtocolNew = 1,
    TaskStart = 2,
    TaskEnd = 3,
    ProtocolLoaded = 4,
}

impl From<ProtocolEvent> for u8 {
    fn from(event: ProtocolEvent) -> u8 {
        event as u8
    }
}

impl TryFrom<u8> for ProtocolEvent {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolEvent::GraphicsReady),
            1 => Ok(ProtocolEvent::ProtocolNew),
            2 => Ok(ProtocolEvent::TaskStart),
            3 => Ok(ProtocolEvent::TaskEnd),
            4 => Ok(ProtocolEvent::ProtocolLoaded),
            other => Err(format!("invalid protocol event: {other}")),
        }
    }
}

/// Payload on the `Protocol` broadcast topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEventMessage {
    #[serde(default)]
    pub protocol_uuid: String,
    pub event: ProtocolEvent,
    /// Event-specific datum (the task index for TaskStart/TaskEnd).
    #[serde(default)]
    pub data: u64,
    #[serde(default)]
    pub protocol_name: String,
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    #[serde(default)]
    pub file_path: String,
}

impl ProtocolEventMessage {
    /// A task-scoped event.
    pub fn task(event: ProtocolEvent, protocol_uuid: &str, index: usize) -> Self {
        Self {
            protocol_uuid: protocol_uuid.to_string(),
            event,
            data: index as u64,
            protocol_name: String::new(),
            participant_id: String::new(),
            notes: String::new(),
            tasks: Vec::new(),
            file_path: String::new(),
        }
    }
}

/// One message on the publish socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub topic: BroadcastTopic,
    pub payload: String,
}
