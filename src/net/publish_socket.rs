//! Broadcast socket.
//!
//! A Pub0 socket; subscribers attach externally. Publishing never
//! applies backpressure to the event source: failures are reported to
//! the caller, which logs and drops.

use crate::error::Result;
use crate::net::reply_socket::map_nng;
use nng::{Message, Protocol, Socket};

pub struct PublishSocket {
    socket: Socket,
}

impl PublishSocket {
    /// Create and bind the publish endpoint.
    pub fn bind(address: &str) -> Result<Self> {
        let socket = Socket::new(Protocol::Pub0).map_err(map_nng)?;
        socket.listen(address).map_err(map_nng)?;
        tracing::info!("publish socket bound on {address}");
        Ok(Self { socket })
    }

    /// Publish one message to every subscriber.
    pub fn publish(&self, bytes: &[u8]) -> Result<()> {
        let message = Message::from(bytes);
        self.socket.send(message).map_err(|(_, e)| map_nng(e))
    }
}
