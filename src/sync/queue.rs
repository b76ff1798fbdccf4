//! Bounded FIFO with a cancellable blocking pop.
//!
//! Used for command delivery, the broadcast outbox, graphics-settings
//! one-shots and the writer's sample backlog. Producers block on
//! [`BoundedQueue::push`] when the queue is full; owners that must never
//! stall use [`BoundedQueue::try_push`] instead.

use crate::sync::cancel::CancelToken;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};

/// A thread-safe bounded FIFO of owned values.
///
/// Cloning shares the same queue; both ends stay alive as long as any
/// clone exists.
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T: Send> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Append a value, blocking while the queue is full.
    pub fn push(&self, value: T) {
        // The queue owns both ends, so the channel can never disconnect
        // while `self` is alive.
        let _ = self.tx.send(value);
    }

    /// Append a value without blocking. Returns false when full.
    pub fn try_push(&self, value: T) -> bool {
        self.tx.try_send(value).is_ok()
    }

    /// Pop the front value without blocking.
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Pop the front value, blocking until one is available or the token
    /// is signalled. Returns None on cancellation without consuming.
    pub fn wait_and_pop(&self, token: &CancelToken) -> Option<T> {
        if token.is_cancelled() {
            return None;
        }
        select! {
            recv(self.rx) -> msg => msg.ok(),
            recv(token.channel()) -> _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::cancel::CancelSource;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(8);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_try_push_respects_capacity() {
        let queue = BoundedQueue::new(2);
        assert!(queue.try_push(1));
        assert!(queue.try_push(2));
        assert!(!queue.try_push(3));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_wait_and_pop_receives_value() {
        let source = CancelSource::new();
        let token = source.token();
        let queue = BoundedQueue::new(4);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(99);
        });
        assert_eq!(queue.wait_and_pop(&token), Some(99));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_and_pop_returns_none_on_cancel() {
        let source = CancelSource::new();
        let token = source.token();
        let queue: BoundedQueue<u32> = BoundedQueue::new(4);
        let handle = thread::spawn(move || queue.wait_and_pop(&token));
        thread::sleep(Duration::from_millis(20));
        source.cancel();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_cancelled_token_does_not_consume() {
        let source = CancelSource::new();
        source.cancel();
        let token = source.token();
        let queue = BoundedQueue::new(4);
        queue.push(7);
        assert_eq!(queue.wait_and_pop(&token), None);
        assert_eq!(queue.try_pop(), Some(7));
    }

    #[test]
    fn test_push_blocks_until_drained() {
        let queue = BoundedQueue::new(1);
        queue.push(1);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            producer.push(2);
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.try_pop(), Some(1));
        handle.join().unwrap();
        assert_eq!(queue.try_pop(), Some(2));
    }
}
