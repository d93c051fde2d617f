//! Protocol handler - correlates commands with their replies

use std::time::Duration;

use notch_transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::{ProtocolError, ProtocolResult};
use crate::parser;
use crate::response::{ConsoleInfo, Failure, MemoryInfo, Reply, Settings, Stats};

/// Timeouts and pacing for protocol operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerConfig {
    /// The console may still be booting when the handshake goes out
    #[serde(rename = "handshake_ms", with = "millis")]
    pub handshake_timeout: Duration,

    #[serde(rename = "command_ms", with = "millis")]
    pub command_timeout: Duration,

    /// Pause between the wake signal and the handshake
    #[serde(rename = "settle_ms", with = "millis")]
    pub settle_delay: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Everything the informational queries returned; `None` where a query failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsoleSnapshot {
    pub info: Option<ConsoleInfo>,
    pub settings: Option<Settings>,
    pub memory: Option<MemoryInfo>,
    pub stats: Option<Stats>,
}

/// Issues NOTCH commands over a [`Transport`] and decodes the replies.
///
/// Every operation returns `Ok(Reply)` for protocol-level outcomes, including
/// timeouts, malformed or negative replies and a connection lost mid-command.
/// `Err` is reserved for contract violations: unsupported environment, not
/// connected, overlapping requests, write failures and invalid arguments.
#[derive(Clone)]
pub struct ProtocolHandler {
    transport: Transport,
    config: HandlerConfig,
}

impl ProtocolHandler {
    pub fn new(transport: Transport) -> Self {
        Self::with_config(transport, HandlerConfig::default())
    }

    pub fn with_config(transport: Transport, config: HandlerConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Open a session, then gather a snapshot.
    ///
    /// Snapshot queries never abort the sequence.
    pub async fn establish(&self) -> ProtocolResult<ConsoleSnapshot> {
        self.open_session().await?;
        Ok(self.snapshot().await)
    }

    /// Connect, wake the console, wait for it to settle and handshake.
    ///
    /// A failed handshake disconnects again and is raised as
    /// [`ProtocolError::Handshake`].
    pub async fn open_session(&self) -> ProtocolResult<()> {
        self.transport.connect().await?;

        // Makes the console skip its boot tutorial; optional
        if let Err(e) = self.wake().await {
            debug!(error = %e, "Wake signal failed, continuing");
        }

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        match self.handshake().await {
            Ok(Reply::Success(())) => info!("Handshake complete"),
            Ok(Reply::Failure(failure)) => {
                warn!(error = %failure, "Handshake failed");
                self.transport.disconnect().await;
                return Err(ProtocolError::Handshake(failure));
            }
            Err(e) => {
                self.transport.disconnect().await;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Query info, settings, memory and stats; each failure is logged and skipped.
    pub async fn snapshot(&self) -> ConsoleSnapshot {
        ConsoleSnapshot {
            info: settle("GET_INFO", self.get_info().await),
            settings: settle("GET_SETTINGS", self.get_settings().await),
            memory: settle("GET_MEMORY", self.get_memory().await),
            stats: settle("GET_STATS", self.get_stats().await),
        }
    }

    /// Send a bare terminator
    pub async fn wake(&self) -> ProtocolResult<()> {
        self.transport.send_command("").await?;
        Ok(())
    }

    pub async fn handshake(&self) -> ProtocolResult<Reply<()>> {
        self.request(
            &Command::Handshake,
            self.config.handshake_timeout,
            parser::decode_handshake,
        )
        .await
    }

    pub async fn get_info(&self) -> ProtocolResult<Reply<ConsoleInfo>> {
        self.request(&Command::GetInfo, self.config.command_timeout, parser::decode_info)
            .await
    }

    pub async fn get_settings(&self) -> ProtocolResult<Reply<Settings>> {
        self.request(
            &Command::GetSettings,
            self.config.command_timeout,
            parser::decode_settings,
        )
        .await
    }

    pub async fn get_memory(&self) -> ProtocolResult<Reply<MemoryInfo>> {
        self.request(&Command::GetMemory, self.config.command_timeout, parser::decode_memory)
            .await
    }

    pub async fn get_stats(&self) -> ProtocolResult<Reply<Stats>> {
        self.request(&Command::GetStats, self.config.command_timeout, parser::decode_stats)
            .await
    }

    pub async fn ping(&self) -> ProtocolResult<Reply<()>> {
        self.request(&Command::Ping, self.config.command_timeout, parser::decode_ping)
            .await
    }

    pub async fn open_menu(&self) -> ProtocolResult<Reply<()>> {
        self.request(&Command::OpenMenu, self.config.command_timeout, parser::decode_ack)
            .await
    }

    pub async fn update_setting(&self, key: &str, value: &str) -> ProtocolResult<Reply<()>> {
        let command = Command::update_setting(key, value)?;
        self.request(&command, self.config.command_timeout, parser::decode_ack)
            .await
    }

    /// Send an arbitrary line and return whatever comes back, undecoded
    pub async fn send_raw(&self, line: &str) -> ProtocolResult<Reply<String>> {
        match self
            .transport
            .send_command_with_response(line, self.config.command_timeout)
            .await
        {
            Ok(reply) => Ok(Reply::Success(reply)),
            Err(e) => capture(line, e),
        }
    }

    async fn request<T>(
        &self,
        command: &Command,
        timeout: Duration,
        decode: fn(&str) -> Result<T, Failure>,
    ) -> ProtocolResult<Reply<T>> {
        let line = command.encode();
        match self.transport.send_command_with_response(&line, timeout).await {
            Ok(reply) => {
                let decoded = Reply::from(decode(&reply));
                if let Reply::Failure(ref failure) = decoded {
                    debug!(command = command.name(), reply = %reply, error = %failure, "Command failed");
                }
                Ok(decoded)
            }
            Err(e) => capture(command.name(), e),
        }
    }
}

/// Fold protocol-level transport outcomes into a failed reply; raise the rest.
fn capture<T>(command: &str, err: TransportError) -> ProtocolResult<Reply<T>> {
    match err {
        TransportError::Timeout(after) => {
            debug!(command, ?after, "Command timed out");
            Ok(Reply::Failure(Failure::Timeout(after)))
        }
        e if e.is_connection_loss() => {
            warn!(command, error = %e, "Connection lost during command");
            Ok(Reply::Failure(Failure::ConnectionLost(e.to_string())))
        }
        e => Err(e.into()),
    }
}

fn settle<T>(command: &str, result: ProtocolResult<Reply<T>>) -> Option<T> {
    match result {
        Ok(reply) => reply.ok_or_log(command),
        Err(e) => {
            warn!(command, error = %e, "Command failed, continuing");
            None
        }
    }
}
