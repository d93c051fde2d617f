//! Protocol error types

use notch_transport::TransportError;
use serde::Serialize;
use thiserror::Error;

use crate::response::Failure;

/// Errors raised past a protocol operation.
///
/// Only contract violations and transport-level failures end up here;
/// timeouts, malformed replies and negative acknowledgements are reported
/// as [`Failure`] inside a [`Reply`](crate::Reply).
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Handshake failed: {0}")]
    Handshake(Failure),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Environment cannot provide a serial endpoint at all
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProtocolError::Transport(TransportError::Unsupported))
    }
}

/// A reply line that does not have the expected shape
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("malformed {expected} reply: {reason}")]
pub struct DecodeError {
    pub expected: &'static str,
    pub reason: String,
}

impl DecodeError {
    pub fn new(expected: &'static str, reason: impl Into<String>) -> Self {
        Self {
            expected,
            reason: reason.into(),
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
