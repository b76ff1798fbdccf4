//! Common test utilities and mock plugins.

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod mock_plugins;

use reyer_rt::net::messages::{BroadcastTopic, ProtocolEvent, ProtocolEventMessage};
use std::time::{Duration, Instant};

/// Poll `predicate` until it holds or the timeout elapses.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

/// Drain protocol lifecycle events currently queued on a broadcast
/// handle.
pub fn drain_protocol_events(
    broadcast: &reyer_rt::broadcast::BroadcastHandle,
) -> Vec<ProtocolEventMessage> {
    let mut events = Vec::new();
    while let Some(message) = broadcast.try_pop() {
        if message.topic == BroadcastTopic::Protocol {
            if let Ok(event) = serde_json::from_str(&message.payload) {
                events.push(event);
            }
        }
    }
    events
}

/// Collect protocol events until `count` arrive or the timeout elapses.
pub fn collect_protocol_events(
    broadcast: &reyer_rt::broadcast::BroadcastHandle,
    count: usize,
    timeout: Duration,
) -> Vec<ProtocolEventMessage> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while events.len() < count && Instant::now() < deadline {
        events.extend(drain_protocol_events(broadcast));
        std::thread::sleep(Duration::from_millis(5));
    }
    events
}

/// The event kinds in arrival order, for compact assertions.
pub fn event_kinds(events: &[ProtocolEventMessage]) -> Vec<(ProtocolEvent, u64)> {
    events.iter().map(|e| (e.event, e.data)).collect()
}
