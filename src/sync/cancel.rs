//! Cooperative cancellation.
//!
//! A [`CancelSource`] owns the signal; [`CancelToken`] clones observe it.
//! Blocking primitives select on the token's channel so a cancellation
//! wakes them promptly. Dropping the source without calling
//! [`CancelSource::cancel`] also signals; a vanished supervisor reads
//! as a stop.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Owning side of a cancellation signal.
pub struct CancelSource {
    flag: Arc<AtomicBool>,
    keep_alive: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            keep_alive: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Dropping the only sender disconnects the channel, waking every
        // token currently blocked in a select.
        self.keep_alive.lock().expect("cancel source poisoned").take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// A token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            flag: Arc::clone(&self.flag),
            rx: self.rx.clone(),
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The channel that disconnects on cancellation, for use in selects.
    pub(crate) fn channel(&self) -> &Receiver<()> {
        &self.rx
    }

    /// A token that never fires. Useful for callers without a supervisor.
    pub fn never() -> Self {
        let (tx, rx) = bounded::<()>(0);
        // Leak the sender so the channel never disconnects.
        std::mem::forget(tx);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            rx,
        }
    }
}
