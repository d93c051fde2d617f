//! Transport error types

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the transport and carried by [`TransportEvent::Error`].
///
/// I/O causes are wrapped in `Arc` so the error stays `Clone` and can be
/// broadcast to every event subscriber.
///
/// [`TransportEvent::Error`]: crate::TransportEvent::Error
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("serial endpoints are not supported in this environment")]
    Unsupported,

    #[error("failed to open endpoint: {0}")]
    Connection(#[source] Arc<io::Error>),

    #[error("not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    Write(#[source] Arc<io::Error>),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("another command is already awaiting its response")]
    Busy,

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("read failed: {0}")]
    Read(#[source] Arc<io::Error>),

    #[error("line contains a record terminator")]
    InvalidLine,

    #[error("disconnected while awaiting a response")]
    Disconnected,
}

impl TransportError {
    /// True when the error means the connection went away underneath an
    /// in-flight command, as opposed to the command itself being refused.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            TransportError::DeviceLost(_) | TransportError::Read(_) | TransportError::Disconnected
        )
    }

    pub(crate) fn connection(err: io::Error) -> Self {
        TransportError::Connection(Arc::new(err))
    }

    pub(crate) fn write(err: io::Error) -> Self {
        TransportError::Write(Arc::new(err))
    }

    /// Classify a failed read: physical removal becomes `DeviceLost`,
    /// anything else is a fatal `Read` error.
    pub(crate) fn from_read(err: io::Error) -> Self {
        if is_device_lost(&err) {
            TransportError::DeviceLost(err.to_string())
        } else {
            TransportError::Read(Arc::new(err))
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Does this read error mean the physical device went away?
pub fn is_device_lost(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    ) {
        return true;
    }

    // EIO, ENXIO, ENODEV: what a USB serial adapter reports once unplugged
    #[cfg(unix)]
    if matches!(err.raw_os_error(), Some(5) | Some(6) | Some(19)) {
        return true;
    }

    err.to_string().contains("device has been lost")
}
