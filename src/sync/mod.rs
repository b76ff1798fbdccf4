//! Thread-coordination primitives shared by every worker.

pub mod cancel;
pub mod queue;

pub use cancel::{CancelSource, CancelToken};
pub use queue::BoundedQueue;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Create a one-shot reply channel.
///
/// The sender side sets the result exactly once; dropping it without
/// sending surfaces as a disconnect to the blocked receiver.
pub fn one_shot<T>() -> (Sender<T>, Receiver<T>) {
    bounded(1)
}
