//! Reply records and the uniform reply shape

use std::collections::BTreeMap;
use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::error::DecodeError;

/// Why a command did not produce its payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("console refused: {0}")]
    Rejected(String),

    #[error("unexpected handshake reply: {0:?}")]
    HandshakeMismatch(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Outcome of one protocol operation.
///
/// Serializes as `{"success": true, "payload": ...}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Success(T),
    Failure(Failure),
}

impl<T> Reply<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success(_))
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            Reply::Success(payload) => Some(payload),
            Reply::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Failure> {
        match self {
            Reply::Success(_) => None,
            Reply::Failure(failure) => Some(failure),
        }
    }

    pub fn into_result(self) -> Result<T, Failure> {
        self.into()
    }

    /// Payload on success; logs and drops the failure otherwise.
    pub fn ok_or_log(self, what: &str) -> Option<T> {
        match self {
            Reply::Success(payload) => Some(payload),
            Reply::Failure(failure) => {
                tracing::warn!(command = what, error = %failure, "Command failed, continuing");
                None
            }
        }
    }
}

impl<T> From<Result<T, Failure>> for Reply<T> {
    fn from(result: Result<T, Failure>) -> Self {
        match result {
            Ok(payload) => Reply::Success(payload),
            Err(failure) => Reply::Failure(failure),
        }
    }
}

impl<T> From<Reply<T>> for Result<T, Failure> {
    fn from(reply: Reply<T>) -> Self {
        match reply {
            Reply::Success(payload) => Ok(payload),
            Reply::Failure(failure) => Err(failure),
        }
    }
}

impl<T: Serialize> Serialize for Reply<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Reply", 2)?;
        match self {
            Reply::Success(payload) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("payload", payload)?;
            }
            Reply::Failure(failure) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", &failure.to_string())?;
            }
        }
        state.end()
    }
}

/// GET_INFO payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleInfo {
    pub model: String,
    pub firmware: String,
    /// Any further fields the firmware reports
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// GET_SETTINGS payload: setting name to raw value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Settings(pub BTreeMap<String, String>);

impl Settings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// GET_MEMORY payload, all in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    /// Free SRAM
    pub sram: u32,
    pub flash: u32,
    pub eeprom: u32,
}

/// GET_STATS payload: counter name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Stats(pub BTreeMap<String, u64>);

impl Stats {
    pub fn get(&self, key: &str) -> Option<u64> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
