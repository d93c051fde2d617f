//! NOTCH Console Protocol
//!
//! A line-based command/response protocol spoken over the serial link.
//!
//! ## Command Format
//! ```text
//! HELLO | GET_INFO | GET_SETTINGS | GET_MEMORY | GET_STATS | PING | OPEN_MENU
//! SET <key> <value>
//! ```
//!
//! ## Reply Format
//! ```text
//! NOTCH_READY                          # Handshake acknowledged
//! OK [message]                         # Command acknowledged
//! ERR <message>                        # Command refused
//! <TAG> key=value key="quoted value"   # Record (INFO, SETTINGS, MEMORY, STATS)
//! ```

pub mod command;
pub mod error;
pub mod handler;
pub mod parser;
pub mod response;

pub use command::Command;
pub use error::{DecodeError, ProtocolError, ProtocolResult};
pub use handler::{ConsoleSnapshot, HandlerConfig, ProtocolHandler};
pub use response::{ConsoleInfo, Failure, MemoryInfo, Reply, Settings, Stats};
