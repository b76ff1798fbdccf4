//! Lifecycle event fan-out.
//!
//! Components push `(topic, payload)` records through a clonable
//! [`BroadcastHandle`]; a dedicated worker serializes them and writes to
//! the publish socket. Failures never push back onto the event source:
//! they are logged and the message is dropped.

use crate::error::Result;
use crate::net::messages::{BroadcastMessage, BroadcastTopic, ProtocolEventMessage};
use crate::net::PublishSocket;
use crate::sync::{BoundedQueue, CancelToken};
use crate::worker::Worker;
use serde::Serialize;

/// Outbox depth; bursts beyond this are dropped with a warning.
const OUTBOX_CAPACITY: usize = 256;

/// Producer side: enqueue events from any thread.
#[derive(Clone)]
pub struct BroadcastHandle {
    outbox: BoundedQueue<BroadcastMessage>,
}

impl BroadcastHandle {
    pub fn new() -> Self {
        Self {
            outbox: BoundedQueue::new(OUTBOX_CAPACITY),
        }
    }

    /// Serialize `payload` and enqueue it under `topic`.
    pub fn publish<T: Serialize>(&self, topic: BroadcastTopic, payload: &T) {
        let payload = match serde_json::to_string(payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("failed to serialize broadcast payload: {e}");
                return;
            }
        };
        let message = BroadcastMessage { topic, payload };
        if !self.outbox.try_push(message) {
            tracing::warn!("broadcast outbox full; event dropped");
        }
    }

    /// Publish a protocol lifecycle event.
    pub fn protocol_event(&self, event: &ProtocolEventMessage) {
        self.publish(BroadcastTopic::Protocol, event);
    }

    /// Pop one queued message without blocking. Used by the publishing
    /// worker and by tests observing event order.
    pub fn try_pop(&self) -> Option<BroadcastMessage> {
        self.outbox.try_pop()
    }

    pub(crate) fn outbox(&self) -> &BoundedQueue<BroadcastMessage> {
        &self.outbox
    }
}

impl Default for BroadcastHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker draining the outbox into the publish socket.
pub struct BroadcastPublisher {
    handle: BroadcastHandle,
    address: String,
    socket: Option<PublishSocket>,
}

impl BroadcastPublisher {
    pub fn new(handle: BroadcastHandle, address: String) -> Self {
        Self {
            handle,
            address,
            socket: None,
        }
    }
}

impl Worker for BroadcastPublisher {
    fn init(&mut self) -> Result<()> {
        self.socket = Some(PublishSocket::bind(&self.address)?);
        Ok(())
    }

    fn run_once(&mut self, stop: &CancelToken) -> Result<()> {
        let Some(message) = self.handle.outbox().wait_and_pop(stop) else {
            return Ok(());
        };
        let Some(socket) = &self.socket else {
            return Ok(());
        };
        match serde_json::to_vec(&message) {
            Ok(bytes) => {
                if let Err(e) = socket.publish(&bytes) {
                    tracing::warn!("failed to publish broadcast message: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize broadcast message: {e}"),
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        // Drain what is already queued so shutdown events still go out.
        while let Some(message) = self.handle.try_pop() {
            if let (Some(socket), Ok(bytes)) = (&self.socket, serde_json::to_vec(&message)) {
                let _ = socket.publish(&bytes);
            }
        }
        self.socket = None;
    }
}
