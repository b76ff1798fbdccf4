//! The application root.
//!
//! Builds every component in dependency order (registry, broadcast,
//! pipeline, graphics, protocol, reply), runs the graphics loop on the
//! calling thread (window and GPU context are thread-affine), and on
//! its return stops the workers in reverse order with individual joins.

use crate::broadcast::{BroadcastHandle, BroadcastPublisher};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::graphics::backend::WindowBackend;
use crate::graphics::window::WinitBackend;
use crate::graphics::GraphicsLoop;
use crate::pipeline::{PipelineEngine, PipelineHandle};
use crate::plugin::PluginRegistry;
use crate::protocol::{ProtocolController, ProtocolHandle};
use crate::server::ReplyServer;
use crate::sync::CancelSource;
use crate::worker::WorkerHandle;
use std::sync::Arc;

pub struct App {
    config: RuntimeConfig,
}

impl App {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Run with the production windowing backend. Must be called on the
    /// process's first thread.
    pub fn launch(self) -> Result<()> {
        let backend = WinitBackend::new()?;
        self.launch_with_backend(Box::new(backend))
    }

    /// Run with a caller-supplied windowing backend.
    pub fn launch_with_backend(self, backend: Box<dyn WindowBackend>) -> Result<()> {
        let config = self.config;
        let stop = CancelSource::new();

        let registry = Arc::new(PluginRegistry::new());
        registry.scan(&config.plugin_paths);
        crate::plugin::builtin::register_builtins(&registry);
        let load_errors = registry.load_errors();
        if !load_errors.is_empty() {
            tracing::warn!("{} plugin(s) failed to load:", load_errors.len());
            for (path, error) in &load_errors {
                tracing::warn!("  {}: {error}", path.display());
            }
        }
        tracing::info!("{} plugin(s) available", registry.plugins().len());

        let broadcast = BroadcastHandle::new();
        let broadcast_worker = WorkerHandle::spawn(
            "broadcast",
            BroadcastPublisher::new(broadcast.clone(), config.publish_address.clone()),
        );

        let pipeline = PipelineHandle::new();
        let pipeline_worker =
            WorkerHandle::spawn("pipeline", PipelineEngine::new(pipeline.clone()));

        let mut graphics = GraphicsLoop::new(
            backend,
            pipeline.clone(),
            broadcast.clone(),
            stop.token(),
            config.start_key,
        );
        graphics.init()?;
        let graphics_handle = graphics.handle();

        let protocol = ProtocolHandle::new();
        let protocol_worker = WorkerHandle::spawn(
            "protocol",
            ProtocolController::new(
                protocol.clone(),
                Arc::clone(&registry),
                graphics_handle.clone(),
                pipeline.clone(),
                broadcast.clone(),
                config.data_dir.clone(),
            ),
        );

        let reply_worker = WorkerHandle::spawn(
            "reply",
            ReplyServer::new(
                config.reply_address.clone(),
                Arc::downgrade(&registry),
                graphics_handle,
                pipeline,
                protocol,
            ),
        );

        // The graphics loop owns the main thread until close or stop.
        graphics.run();

        tracing::info!("shutting down");
        stop.cancel();
        reply_worker.stop();
        protocol_worker.stop();
        pipeline_worker.stop();
        broadcast_worker.stop();
        tracing::info!("all workers joined");
        Ok(())
    }
}
