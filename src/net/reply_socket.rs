//! Request/reply socket.
//!
//! A Rep0 socket bound to the configured address. Receives use a 100 ms
//! timeout so the owning worker observes its stop token promptly;
//! timeouts surface as [`RtError::Transient`] and are retried by the
//! caller.

use crate::error::{Result, RtError};
use nng::options::{Options, RecvTimeout};
use nng::{Message, Protocol, Socket};
use std::time::Duration;

/// Receive timeout on the reply socket.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct ReplySocket {
    socket: Socket,
}

impl ReplySocket {
    /// Create and bind the reply endpoint.
    pub fn bind(address: &str) -> Result<Self> {
        let socket = Socket::new(Protocol::Rep0).map_err(map_nng)?;
        socket
            .set_opt::<RecvTimeout>(Some(RECEIVE_TIMEOUT))
            .map_err(map_nng)?;
        socket.listen(address).map_err(|e| match e {
            nng::Error::AddressInUse => RtError::ResourceUnavailable(format!(
                "cannot bind {address}: address in use; another instance may already be running"
            )),
            other => map_nng(other),
        })?;
        tracing::info!("reply socket bound on {address}");
        Ok(Self { socket })
    }

    /// Receive one request. `Transient` on timeout.
    pub fn receive(&self) -> Result<Vec<u8>> {
        let message = self.socket.recv().map_err(map_nng)?;
        Ok(message.as_slice().to_vec())
    }

    /// Send the reply to the last received request.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let message = Message::from(bytes);
        self.socket.send(message).map_err(|(_, e)| map_nng(e))
    }
}

pub(crate) fn map_nng(error: nng::Error) -> RtError {
    match error {
        nng::Error::TimedOut | nng::Error::TryAgain => {
            RtError::Transient(error.to_string())
        }
        other => RtError::ResourceUnavailable(other.to_string()),
    }
}
