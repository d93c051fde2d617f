//! NOTCH Transport Layer
//!
//! Turns a raw, half-duplex byte stream to the NOTCH console into a
//! line-oriented request/response channel:
//! - Endpoints: serial ports (`serial` feature) or in-memory pairs
//! - Framing: newline-delimited lines, robust to arbitrary chunking
//! - Correlation: at most one command awaiting its response at a time
//! - Events: connected, disconnected, error, unsolicited line

pub mod endpoint;
pub mod error;
pub mod lines;
pub mod memory;
#[cfg(feature = "serial")]
pub mod serial;
pub mod transport;

pub use endpoint::{Endpoint, EndpointProvider, LinkSettings, DEFAULT_BAUD_RATE};
pub use error::{is_device_lost, TransportError, TransportResult};
pub use lines::{Framed, FramingError, LineBuffer, MAX_LINE_LEN};
pub use memory::{MemoryDevice, MemoryProvider};
#[cfg(feature = "serial")]
pub use serial::SerialProvider;
pub use transport::{ConnectionState, Transport, TransportEvent};
