//! Endpoint abstraction - where the byte stream comes from

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Fixed link rate of the console's serial interface
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// A bidirectional byte stream to the console.
pub trait Endpoint: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Endpoint for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Link parameters handed to the provider when opening an endpoint.
///
/// Framing is always 8N1 without flow control; only the rate is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// The environment that hands out endpoints.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    /// Can this environment provide an endpoint at all?
    fn is_supported(&self) -> bool;

    /// Acquire and open one endpoint
    async fn open(&self, settings: &LinkSettings) -> io::Result<Box<dyn Endpoint>>;

    /// Human-readable description used in logs
    fn describe(&self) -> String;
}
