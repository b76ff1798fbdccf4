//! Uniform lifecycle for background threads.
//!
//! Every long-running component follows the same skeleton:
//! `init → (while not stopped) run_once → shutdown`. Stop is cooperative:
//! the supervisor signals a token the body observes inside its blocking
//! waits, then joins. A pause latch parks the loop on a condition
//! variable with a 10 ms keep-alive check so shutdown is never starved.

use crate::error::Result;
use crate::sync::{CancelSource, CancelToken};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Interval at which a paused loop re-checks its stop token.
const PAUSE_KEEP_ALIVE: Duration = Duration::from_millis(10);

/// One background thread's body.
pub trait Worker: Send + 'static {
    /// Called once on the worker thread before the loop starts.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// One loop iteration. Blocking waits inside must observe `stop`.
    fn run_once(&mut self, stop: &CancelToken) -> Result<()>;

    /// Called once on the worker thread after the loop exits.
    fn shutdown(&mut self) {}
}

struct PauseLatch {
    paused: Mutex<bool>,
    unparked: Condvar,
}

impl PauseLatch {
    fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            unparked: Condvar::new(),
        }
    }

    fn set(&self, value: bool) {
        *self.paused.lock().expect("pause latch poisoned") = value;
        self.unparked.notify_all();
    }

    /// Park while paused, waking periodically to observe the stop token.
    fn park(&self, stop: &CancelToken) {
        let mut paused = self.paused.lock().expect("pause latch poisoned");
        while *paused && !stop.is_cancelled() {
            let (guard, _) = self
                .unparked
                .wait_timeout(paused, PAUSE_KEEP_ALIVE)
                .expect("pause latch poisoned");
            paused = guard;
        }
    }
}

/// Supervisor handle for one spawned worker.
pub struct WorkerHandle {
    name: &'static str,
    stop: CancelSource,
    latch: Arc<PauseLatch>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn `worker` on a named thread running the standard loop.
    pub fn spawn<W: Worker>(name: &'static str, mut worker: W) -> Self {
        let stop = CancelSource::new();
        let token = stop.token();
        let latch = Arc::new(PauseLatch::new());
        let thread_latch = Arc::clone(&latch);

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::info!("{name} worker started");
                if let Err(e) = worker.init() {
                    tracing::error!("{name} worker failed to initialize: {e}");
                    worker.shutdown();
                    return;
                }
                while !token.is_cancelled() {
                    thread_latch.park(&token);
                    if token.is_cancelled() {
                        break;
                    }
                    if let Err(e) = worker.run_once(&token) {
                        if e.is_transient() {
                            tracing::trace!("{name} worker: {e}");
                        } else {
                            tracing::warn!("{name} worker iteration failed: {e}");
                        }
                    }
                }
                worker.shutdown();
                tracing::info!("{name} worker stopped");
            })
            .expect("failed to spawn worker thread");

        Self {
            name,
            stop,
            latch,
            thread: Some(thread),
        }
    }

    /// Park the loop between iterations.
    pub fn pause(&self) {
        self.latch.set(true);
    }

    /// Resume a paused loop.
    pub fn resume(&self) {
        self.latch.set(false);
    }

    /// Request a cooperative stop and join the thread.
    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.cancel();
        self.latch.set(false);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("{} worker panicked", self.name);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop_and_join();
        }
    }
}
