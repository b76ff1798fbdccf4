//! Error handling for the Reyer runtime.
//!
//! This module defines the runtime-wide error type and a Result alias.
//! Every error that can cross the reply boundary carries a stable wire
//! code via [`RtError::code`].

use thiserror::Error;

/// Main error type for runtime operations.
#[derive(Error, Debug)]
pub enum RtError {
    /// A plugin name was unknown or a resource was missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A payload would not decode.
    #[error("bad message: {0}")]
    BadMessage(String),

    /// The request was rejected by the current state.
    #[error("busy: {0}")]
    Busy(String),

    /// The request was rejected by the component lifecycle.
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// A dependency handle could not be acquired.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// A dynamic library was rejected during loading.
    #[error("executable format error: {0}")]
    ExecutableFormat(String),

    /// A wire timeout or would-block condition. Recovered locally.
    #[error("transient: {0}")]
    Transient(String),

    /// IO errors (dataset files, plugin directories).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RtError {
    /// Stable wire code for the reply boundary.
    pub fn code(&self) -> i32 {
        match self {
            RtError::NotFound(_) => 1,
            RtError::InvalidArgument(_) => 2,
            RtError::BadMessage(_) | RtError::Serialization(_) => 3,
            RtError::Busy(_) => 4,
            RtError::NotPermitted(_) => 5,
            RtError::ResourceUnavailable(_) => 6,
            RtError::ExecutableFormat(_) => 7,
            RtError::Transient(_) => 8,
            RtError::Io(_) => 9,
        }
    }

    /// Whether the error is recoverable by retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, RtError::Transient(_))
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RtError>;
