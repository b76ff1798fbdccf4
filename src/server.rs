//! The request/reply server.
//!
//! Reads one tagged-by-shape request at a time, dispatches into the
//! registry, pipeline, graphics and protocol surfaces, and always
//! answers with exactly one [`Response`], error paths included. The
//! socket receive runs under a 100 ms timeout so the worker observes
//! its stop token promptly.

use crate::error::{Result, RtError};
use crate::graphics::GraphicsHandle;
use crate::net::messages::{
    CommandRequest, GraphicsSettingsRequest, PipelineConfigRequest, Ping, PluginListing, Pong,
    ProtocolRequest, Request, ResourceCode, ResourceRequest, Response,
};
use crate::net::ReplySocket;
use crate::pipeline::PipelineHandle;
use crate::plugin::{Plugin, PluginRegistry};
use crate::protocol::ProtocolHandle;
use crate::sync::CancelToken;
use crate::worker::Worker;
use serde::Serialize;
use std::sync::{Arc, Weak};

pub struct ReplyServer {
    address: String,
    socket: Option<ReplySocket>,
    registry: Weak<PluginRegistry>,
    graphics: GraphicsHandle,
    pipeline: PipelineHandle,
    protocol: ProtocolHandle,
}

impl ReplyServer {
    pub fn new(
        address: String,
        registry: Weak<PluginRegistry>,
        graphics: GraphicsHandle,
        pipeline: PipelineHandle,
        protocol: ProtocolHandle,
    ) -> Self {
        Self {
            address,
            socket: None,
            registry,
            graphics,
            pipeline,
            protocol,
        }
    }

    fn registry(&self) -> Result<Arc<PluginRegistry>> {
        self.registry.upgrade().ok_or_else(|| {
            RtError::ResourceUnavailable("plugin registry is shutting down".to_string())
        })
    }

    fn payload<T: Serialize>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// Dispatch one decoded request. Never panics; every branch yields a
    /// response.
    pub fn dispatch(&self, request: Request) -> Response {
        let result = match request {
            Request::Ping(ping) => self.handle_ping(ping),
            Request::GraphicsSettings(request) => self.handle_graphics_settings(request),
            Request::Protocol(request) => self.handle_protocol(request),
            Request::PipelineConfig(request) => self.handle_pipeline_config(request),
            Request::Command(request) => self.handle_command(request),
            Request::Resource(request) => self.handle_resource(request),
        };
        match result {
            Ok(payload) => Response::ok(payload),
            Err(e) => {
                tracing::debug!("request failed: {e}");
                Response::error(&e)
            }
        }
    }

    fn handle_ping(&self, ping: Ping) -> Result<String> {
        Self::payload(&Pong {
            timestamp: ping.timestamp,
        })
    }

    fn handle_graphics_settings(&self, request: GraphicsSettingsRequest) -> Result<String> {
        let reply = self.graphics.apply_settings(request);
        match reply.recv() {
            Ok(result) => result.map(|()| String::new()),
            Err(_) => Err(RtError::ResourceUnavailable(
                "graphics loop is shutting down".to_string(),
            )),
        }
    }

    fn handle_protocol(&self, request: ProtocolRequest) -> Result<String> {
        let registry = self.registry()?;

        // Unknown or non-render task names are soft-logged and dropped;
        // the run proceeds on the validated remainder.
        let mut validated = Vec::with_capacity(request.tasks.len());
        for task in &request.tasks {
            match registry.get(&task.name) {
                Ok(plugin) if plugin.as_render().is_some() => validated.push(task.clone()),
                Ok(_) => tracing::warn!(
                    "protocol \"{}\": task \"{}\" is not a render plugin; skipped",
                    request.name,
                    task.name
                ),
                Err(e) => tracing::warn!(
                    "protocol \"{}\": task \"{}\" skipped: {e}",
                    request.name,
                    task.name
                ),
            }
        }
        if validated.is_empty() {
            return Err(RtError::InvalidArgument(
                "protocol contains no runnable tasks".to_string(),
            ));
        }

        let mut protocol = request;
        protocol.tasks = validated;
        if protocol.protocol_uuid.is_empty() {
            protocol.protocol_uuid = uuid::Uuid::new_v4().to_string();
            tracing::debug!("generated protocol UUID: {}", protocol.protocol_uuid);
        }

        self.protocol.set_protocol(protocol)?;
        Ok(String::new())
    }

    fn handle_pipeline_config(&self, request: PipelineConfigRequest) -> Result<String> {
        let registry = self.registry()?;

        let source = registry.get(&request.source)?;
        let calibration = match &request.calibration {
            Some(name) if !name.is_empty() => Some(registry.get(name)?),
            _ => None,
        };
        let stages = request
            .stages
            .iter()
            .map(|name| registry.get(name))
            .collect::<Result<Vec<Plugin>>>()?;

        self.pipeline.configure(Some(source), calibration, stages)?;
        Ok(String::new())
    }

    fn handle_command(&self, request: CommandRequest) -> Result<String> {
        let reply = self.protocol.enqueue_command(request.command);
        match reply.recv() {
            Ok(result) => result.map(|()| String::new()),
            Err(_) => Err(RtError::ResourceUnavailable(
                "protocol controller is shutting down".to_string(),
            )),
        }
    }

    fn handle_resource(&self, request: ResourceRequest) -> Result<String> {
        match request.resource_code {
            ResourceCode::RuntimeState => {
                let state = self
                    .protocol
                    .runtime_state(self.graphics.is_initialized());
                Self::payload(&state)
            }
            ResourceCode::Monitors => Self::payload(&self.graphics.monitors()),
            ResourceCode::Sources => self.listings(|p| p.as_source().is_some()),
            ResourceCode::Stages => self.listings(|p| p.as_stage().is_some()),
            ResourceCode::Sinks => self.listings(|p| p.as_sink().is_some()),
            ResourceCode::Tasks => self.listings(|p| p.as_render().is_some()),
            ResourceCode::Calibrations => self.listings(|p| p.as_calibration().is_some()),
            ResourceCode::GraphicsSettings => Self::payload(&self.graphics.current_settings()),
            ResourceCode::Protocol => Self::payload(&self.protocol.current_protocol()),
            ResourceCode::CurrentTask => Self::payload(&self.protocol.current_task()),
        }
    }

    fn listings(&self, has: impl Fn(&Plugin) -> bool) -> Result<String> {
        let registry = self.registry()?;
        let listings: Vec<PluginListing> = registry
            .plugins()
            .into_iter()
            .filter(|p| has(p))
            .map(|p| {
                let (schema, default) = match p.as_configurable() {
                    Some(configurable) => {
                        (configurable.config_schema(), configurable.default_config())
                    }
                    None => ("{}".to_string(), "{}".to_string()),
                };
                PluginListing {
                    name: p.name().to_string(),
                    author: p.author().to_string(),
                    description: p.description().to_string(),
                    version: p.version(),
                    configuration_schema: schema,
                    default_configuration: default,
                }
            })
            .collect();
        Self::payload(&listings)
    }
}

impl Worker for ReplyServer {
    fn init(&mut self) -> Result<()> {
        self.socket = Some(ReplySocket::bind(&self.address)?);
        Ok(())
    }

    fn run_once(&mut self, _stop: &CancelToken) -> Result<()> {
        let Some(socket) = &self.socket else {
            return Ok(());
        };

        let bytes = match socket.receive() {
            Ok(bytes) => bytes,
            Err(e) if e.is_transient() => return Ok(()),
            Err(e) => return Err(e),
        };

        let response = match serde_json::from_slice::<Request>(&bytes) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                tracing::warn!("failed to decode request: {e}");
                Response::error(&RtError::BadMessage(e.to_string()))
            }
        };

        let encoded = serde_json::to_vec(&response)?;
        if let Err(e) = socket.send(&encoded) {
            tracing::error!("failed to send response: {e}");
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.socket = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::backend::Canvas;
    use crate::net::messages::{RuntimeState, TaskEntry};
    use crate::plugin::api::{PluginModule, RenderTask};
    use crate::plugin::PluginInfo;
    use crate::protocol::ControllerState;
    use crate::types::{CalibrationPoint, RenderContext};

    struct NullRender;
    impl RenderTask for NullRender {
        fn set_render_context(&self, _ctx: RenderContext) {}
        fn render(&self, _canvas: &mut Canvas) {}
        fn is_finished(&self) -> bool {
            false
        }
        fn take_calibration_points(&self) -> Vec<CalibrationPoint> {
            Vec::new()
        }
    }
    impl PluginModule for NullRender {
        fn as_render(&self) -> Option<&dyn RenderTask> {
            Some(self)
        }
    }

    struct Fixture {
        server: ReplyServer,
        protocol: ProtocolHandle,
        _registry: Arc<PluginRegistry>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(PluginRegistry::new());
        registry.insert(Plugin::from_module(
            Box::new(NullRender),
            PluginInfo {
                name: "Demo".to_string(),
                ..Default::default()
            },
        ));
        let protocol = ProtocolHandle::new();
        let server = ReplyServer::new(
            "unused".to_string(),
            Arc::downgrade(&registry),
            crate::graphics::GraphicsLoop::new(
                Box::new(crate::graphics::backend::HeadlessBackend::new().0),
                PipelineHandle::new(),
                crate::broadcast::BroadcastHandle::new(),
                crate::sync::CancelSource::new().token(),
                's',
            )
            .handle(),
            PipelineHandle::new(),
            protocol.clone(),
        );
        Fixture {
            server,
            protocol,
            _registry: registry,
        }
    }

    fn protocol_request() -> ProtocolRequest {
        ProtocolRequest {
            name: "p1".to_string(),
            participant_id: "u".to_string(),
            tasks: vec![TaskEntry {
                name: "Demo".to_string(),
                configuration: "{}".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_ping_round_trip() {
        let fx = fixture();
        let response = fx.server.dispatch(Request::Ping(Ping { timestamp: 777 }));
        assert!(response.success);
        let pong: Pong = serde_json::from_str(&response.payload).unwrap();
        assert_eq!(pong.timestamp, 777);
    }

    #[test]
    fn test_protocol_assigns_uuid_and_round_trips() {
        let fx = fixture();
        let submitted = protocol_request();
        let response = fx.server.dispatch(Request::Protocol(submitted.clone()));
        assert!(response.success, "{}", response.error_message);

        let response = fx.server.dispatch(Request::Resource(ResourceRequest {
            resource_code: ResourceCode::Protocol,
        }));
        let current: Option<ProtocolRequest> = serde_json::from_str(&response.payload).unwrap();
        let current = current.unwrap();
        assert!(!current.protocol_uuid.is_empty());
        assert!(uuid::Uuid::parse_str(&current.protocol_uuid).is_ok());
        // Identical apart from the assigned UUID.
        let mut expected = submitted;
        expected.protocol_uuid = current.protocol_uuid.clone();
        assert_eq!(current, expected);
    }

    #[test]
    fn test_protocol_soft_drops_unknown_tasks() {
        let fx = fixture();
        let mut request = protocol_request();
        request.tasks.push(TaskEntry {
            name: "NoSuchTask".to_string(),
            configuration: String::new(),
        });
        let response = fx.server.dispatch(Request::Protocol(request));
        assert!(response.success);
        let current = fx.protocol.current_protocol().unwrap();
        assert_eq!(current.tasks.len(), 1);
        assert_eq!(current.tasks[0].name, "Demo");
    }

    #[test]
    fn test_protocol_with_no_runnable_tasks_fails() {
        let fx = fixture();
        let mut request = protocol_request();
        request.tasks = vec![TaskEntry {
            name: "NoSuchTask".to_string(),
            configuration: String::new(),
        }];
        let response = fx.server.dispatch(Request::Protocol(request));
        assert!(!response.success);
        assert_eq!(response.error_code, 2);
        assert!(fx.protocol.current_protocol().is_none());
    }

    #[test]
    fn test_protocol_busy_while_running() {
        let fx = fixture();
        fx.server
            .dispatch(Request::Protocol(protocol_request()));
        fx.protocol.force_state(ControllerState::Running);

        let mut second = protocol_request();
        second.name = "p2".to_string();
        let response = fx.server.dispatch(Request::Protocol(second));
        assert!(!response.success);
        assert_eq!(response.error_code, 4);
        assert_eq!(fx.protocol.current_protocol().unwrap().name, "p1");
    }

    #[test]
    fn test_pipeline_config_unknown_plugin_fails_whole_request() {
        let fx = fixture();
        let response = fx.server.dispatch(Request::PipelineConfig(PipelineConfigRequest {
            source: "NoSuchSource".to_string(),
            calibration: None,
            stages: Vec::new(),
        }));
        assert!(!response.success);
        assert_eq!(response.error_code, 1);
    }

    #[test]
    fn test_runtime_state_resource() {
        let fx = fixture();
        let response = fx.server.dispatch(Request::Resource(ResourceRequest {
            resource_code: ResourceCode::RuntimeState,
        }));
        let state: RuntimeState = serde_json::from_str(&response.payload).unwrap();
        assert_eq!(state, RuntimeState::Default);
    }

    #[test]
    fn test_task_listing_includes_render_plugin() {
        let fx = fixture();
        let response = fx.server.dispatch(Request::Resource(ResourceRequest {
            resource_code: ResourceCode::Tasks,
        }));
        let listings: Vec<PluginListing> = serde_json::from_str(&response.payload).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "Demo");
    }

    #[test]
    fn test_dead_registry_is_resource_unavailable() {
        let fx = fixture();
        let server = fx.server;
        drop(fx._registry);
        let response = server.dispatch(Request::Resource(ResourceRequest {
            resource_code: ResourceCode::Tasks,
        }));
        assert!(!response.success);
        assert_eq!(response.error_code, 6);
    }
}
