//! End-to-end protocol lifecycle tests.
//!
//! Wires the real components together (registry, pipeline worker,
//! graphics loop on a headless backend, protocol controller, request
//! dispatch) and validates state transitions, broadcast ordering and
//! the recorded dataset.

mod common;

use common::mock_plugins::{channel_source, counting_render, RenderCounters};
use common::{collect_protocol_events, event_kinds, wait_until};
use crossbeam_channel::bounded;
use reyer_rt::broadcast::BroadcastHandle;
use reyer_rt::dataset::DatasetFile;
use reyer_rt::graphics::backend::{HeadlessBackend, HeadlessControl};
use reyer_rt::graphics::{GraphicsHandle, GraphicsLoop};
use reyer_rt::net::messages::{
    Command, CommandRequest, GraphicsSettings, GraphicsSettingsRequest, ProtocolEvent,
    ProtocolRequest, Request, TaskEntry,
};
use reyer_rt::pipeline::{PipelineEngine, PipelineHandle};
use reyer_rt::plugin::{Plugin, PluginRegistry};
use reyer_rt::protocol::{ControllerState, ProtocolController, ProtocolHandle};
use reyer_rt::server::ReplyServer;
use reyer_rt::sync::CancelSource;
use reyer_rt::types::EyeSample;
use reyer_rt::worker::WorkerHandle;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

struct Rig {
    /// Kept alive so the server's weak registry handle stays valid.
    _registry: Arc<PluginRegistry>,
    broadcast: BroadcastHandle,
    pipeline: PipelineHandle,
    graphics: GraphicsHandle,
    protocol: ProtocolHandle,
    control: HeadlessControl,
    server: ReplyServer,
    stop: CancelSource,
    pipeline_worker: Option<WorkerHandle>,
    protocol_worker: Option<WorkerHandle>,
    graphics_thread: Option<JoinHandle<()>>,
    data_dir: tempfile::TempDir,
}

impl Rig {
    fn new(plugins: Vec<Plugin>) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        for plugin in plugins {
            registry.insert(plugin);
        }

        let broadcast = BroadcastHandle::new();
        let pipeline = PipelineHandle::new();
        let stop = CancelSource::new();
        let data_dir = tempfile::tempdir().unwrap();

        let pipeline_worker =
            WorkerHandle::spawn("pipeline", PipelineEngine::new(pipeline.clone()));

        let (backend, control) = HeadlessBackend::new();
        let (handle_tx, handle_rx) = bounded(1);
        let graphics_pipeline = pipeline.clone();
        let graphics_broadcast = broadcast.clone();
        let graphics_stop = stop.token();
        let graphics_thread = std::thread::spawn(move || {
            let mut graphics = GraphicsLoop::new(
                Box::new(backend),
                graphics_pipeline,
                graphics_broadcast,
                graphics_stop,
                's',
            );
            graphics.init().unwrap();
            handle_tx.send(graphics.handle()).unwrap();
            graphics.run();
        });
        let graphics = handle_rx.recv().unwrap();

        let protocol = ProtocolHandle::new();
        let protocol_worker = WorkerHandle::spawn(
            "protocol",
            ProtocolController::new(
                protocol.clone(),
                Arc::clone(&registry),
                graphics.clone(),
                pipeline.clone(),
                broadcast.clone(),
                data_dir.path().to_path_buf(),
            ),
        );

        let server = ReplyServer::new(
            "unused".to_string(),
            Arc::downgrade(&registry),
            graphics.clone(),
            pipeline.clone(),
            protocol.clone(),
        );

        Self {
            _registry: registry,
            broadcast,
            pipeline,
            graphics,
            protocol,
            control,
            server,
            stop,
            pipeline_worker: Some(pipeline_worker),
            protocol_worker: Some(protocol_worker),
            graphics_thread: Some(graphics_thread),
            data_dir,
        }
    }

    fn apply_graphics_settings(&self) {
        let response = self
            .server
            .dispatch(Request::GraphicsSettings(GraphicsSettingsRequest {
                graphics_settings: GraphicsSettings {
                    monitor_index: 0,
                    width: 640,
                    height: 480,
                    target_fps: 60,
                    vsync: true,
                    full_screen: false,
                    anti_aliasing: false,
                },
                view_distance_mm: 600,
            }));
        assert!(response.success, "{}", response.error_message);
        assert!(self.graphics.is_initialized());
    }

    fn submit_protocol(&self, name: &str, tasks: &[&str]) {
        let response = self.server.dispatch(Request::Protocol(ProtocolRequest {
            name: name.to_string(),
            tasks: tasks
                .iter()
                .map(|name| TaskEntry {
                    name: name.to_string(),
                    configuration: "{}".to_string(),
                })
                .collect(),
            ..Default::default()
        }));
        assert!(response.success, "{}", response.error_message);
        assert!(wait_until(Duration::from_secs(5), || {
            self.protocol.state() == ControllerState::Standby
        }));
    }

    fn command(&self, command: Command) {
        let response = self.server.dispatch(Request::Command(CommandRequest {
            origin: "test".to_string(),
            destination: "rt".to_string(),
            command,
        }));
        assert!(response.success, "{}", response.error_message);
    }

    fn shutdown(mut self) {
        self.graphics.request_stop();
        if let Some(thread) = self.graphics_thread.take() {
            thread.join().unwrap();
        }
        self.stop.cancel();
        if let Some(worker) = self.protocol_worker.take() {
            worker.stop();
        }
        if let Some(worker) = self.pipeline_worker.take() {
            worker.stop();
        }
    }
}

fn feed_samples(feed: &crossbeam_channel::Sender<EyeSample>, count: u64) {
    for i in 0..count {
        let _ = feed.send(EyeSample {
            timestamp: i,
            ..Default::default()
        });
    }
}

#[test]
fn test_full_protocol_lifecycle() {
    let (task_a, counters_a) = counting_render("TaskA", 5);
    let (task_b, counters_b) = counting_render("TaskB", 0);
    let rig = Rig::new(vec![task_a, task_b]);

    rig.apply_graphics_settings();
    let events = collect_protocol_events(&rig.broadcast, 1, Duration::from_secs(5));
    assert_eq!(
        event_kinds(&events),
        vec![(ProtocolEvent::GraphicsReady, 0)]
    );

    // Feed the pipeline through a mock source so task sinks and the
    // dataset writer observe samples.
    let (feed, source, _lifecycle) = channel_source("TestSource");
    rig.pipeline.configure(Some(source), None, Vec::new()).unwrap();

    rig.submit_protocol("P", &["TaskA", "TaskB"]);
    let uuid = rig.protocol.current_protocol().unwrap().protocol_uuid;
    assert!(!uuid.is_empty());

    rig.command(Command::Start);

    // Task 0 finishes after five frames; the controller advances on its
    // own. ProtocolLoaded → ProtocolNew → TaskStart(0) → TaskEnd(0) →
    // TaskStart(1), with no gap broadcasts in between.
    let events = collect_protocol_events(&rig.broadcast, 5, Duration::from_secs(10));
    assert_eq!(
        event_kinds(&events),
        vec![
            (ProtocolEvent::ProtocolLoaded, 0),
            (ProtocolEvent::ProtocolNew, 0),
            (ProtocolEvent::TaskStart, 0),
            (ProtocolEvent::TaskEnd, 0),
            (ProtocolEvent::TaskStart, 1),
        ]
    );
    assert!(counters_a.renders.load(std::sync::atomic::Ordering::SeqCst) >= 5);
    assert_eq!(
        counters_a.shutdowns.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert_eq!(rig.protocol.current_task().unwrap().index, 1);

    // Samples reach the running task's sink.
    feed_samples(&feed, 50);
    assert!(wait_until(Duration::from_secs(5), || {
        counters_b.consumed.load(std::sync::atomic::Ordering::SeqCst) > 0
    }));

    // A second protocol while running is rejected and leaves the
    // current one untouched.
    let response = rig.server.dispatch(Request::Protocol(ProtocolRequest {
        name: "P2".to_string(),
        tasks: vec![TaskEntry {
            name: "TaskA".to_string(),
            configuration: String::new(),
        }],
        ..Default::default()
    }));
    assert!(!response.success);
    assert_eq!(response.error_code, 4);
    assert_eq!(rig.protocol.current_protocol().unwrap().name, "P");

    // STOP ends the run; the controller saves and returns to standby.
    rig.command(Command::Stop);
    assert!(wait_until(Duration::from_secs(5), || {
        rig.protocol.state() == ControllerState::Standby
    }));
    let events = collect_protocol_events(&rig.broadcast, 1, Duration::from_secs(5));
    assert_eq!(event_kinds(&events), vec![(ProtocolEvent::TaskEnd, 1)]);
    assert_eq!(
        counters_b.shutdowns.load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // The dataset holds one group per task; the second saw samples.
    let path = rig.data_dir.path().join(format!("{uuid}.reyd"));
    let groups = DatasetFile::read_all(&path).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].0, "task_000");
    assert_eq!(groups[1].0, "task_001");
    assert!(!groups[1].1.is_empty());

    rig.shutdown();
}

#[test]
fn test_standby_start_gesture_begins_run() {
    let (task, _counters) = counting_render("TaskA", 0);
    let rig = Rig::new(vec![task]);

    rig.apply_graphics_settings();
    rig.submit_protocol("Gesture", &["TaskA"]);
    // Settle on the loaded protocol before gesturing; both events must
    // have gone out so the collection below starts clean.
    let events = collect_protocol_events(&rig.broadcast, 2, Duration::from_secs(5));
    assert_eq!(
        event_kinds(&events),
        vec![
            (ProtocolEvent::GraphicsReady, 0),
            (ProtocolEvent::ProtocolLoaded, 0),
        ]
    );

    // The operator's start key on the standby screen begins the run.
    rig.control.press_key('s');
    assert!(wait_until(Duration::from_secs(5), || {
        rig.protocol.state() == ControllerState::Running
    }));
    let events = collect_protocol_events(&rig.broadcast, 2, Duration::from_secs(5));
    assert_eq!(
        event_kinds(&events),
        vec![(ProtocolEvent::ProtocolNew, 0), (ProtocolEvent::TaskStart, 0)]
    );

    rig.shutdown();
}

#[test]
fn test_window_close_during_run_shuts_down_cleanly() {
    let (task, counters) = counting_render("TaskA", 0);
    let rig = Rig::new(vec![task]);

    rig.apply_graphics_settings();
    rig.submit_protocol("CloseMe", &["TaskA"]);
    rig.command(Command::Start);
    assert!(wait_until(Duration::from_secs(5), || {
        rig.protocol.state() == ControllerState::Running
    }));
    let uuid = rig.protocol.current_protocol().unwrap().protocol_uuid;
    let path = rig.data_dir.path().join(format!("{uuid}.reyd"));

    // Operator closes the window mid-run; everything joins and the
    // dataset file is left in a readable state.
    rig.control.request_close();
    let counters_for_join: Arc<RenderCounters> = Arc::clone(&counters);
    rig.shutdown();

    assert_eq!(
        counters_for_join
            .shutdowns
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    let groups = DatasetFile::read_all(&path).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].0, "task_000");
}
