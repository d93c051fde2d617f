//! NOTCH command vocabulary

use std::fmt;

use crate::error::{ProtocolError, ProtocolResult};

/// A console command, encoded as exactly one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELLO
    Handshake,

    /// GET_INFO
    GetInfo,

    /// GET_SETTINGS
    GetSettings,

    /// GET_MEMORY
    GetMemory,

    /// GET_STATS
    GetStats,

    /// PING
    Ping,

    /// OPEN_MENU
    OpenMenu,

    /// SET <key> <value>
    UpdateSetting { key: String, value: String },
}

impl Command {
    /// Build a `SET` command, rejecting arguments that cannot travel in one line.
    pub fn update_setting(key: impl Into<String>, value: impl Into<String>) -> ProtocolResult<Self> {
        let key = key.into();
        let value = value.into();

        if key.is_empty() {
            return Err(ProtocolError::InvalidArgument("setting key is empty".into()));
        }
        if key
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || c == '"')
        {
            return Err(ProtocolError::InvalidArgument(format!(
                "Invalid setting key: {:?}",
                key
            )));
        }
        if value.contains(['\n', '\r', '"']) {
            return Err(ProtocolError::InvalidArgument(
                "setting value contains a line break or quote".into(),
            ));
        }

        Ok(Command::UpdateSetting { key, value })
    }

    /// Wire token naming the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::Handshake => "HELLO",
            Command::GetInfo => "GET_INFO",
            Command::GetSettings => "GET_SETTINGS",
            Command::GetMemory => "GET_MEMORY",
            Command::GetStats => "GET_STATS",
            Command::Ping => "PING",
            Command::OpenMenu => "OPEN_MENU",
            Command::UpdateSetting { .. } => "SET",
        }
    }

    /// Encode to a single line, without terminator
    pub fn encode(&self) -> String {
        match self {
            Command::UpdateSetting { key, value } => {
                if value.is_empty() || value.contains(char::is_whitespace) {
                    format!("SET {} \"{}\"", key, value)
                } else {
                    format!("SET {} {}", key, value)
                }
            }
            other => other.name().to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple_commands() {
        assert_eq!(Command::Handshake.encode(), "HELLO");
        assert_eq!(Command::GetMemory.encode(), "GET_MEMORY");
        assert_eq!(Command::OpenMenu.to_string(), "OPEN_MENU");
    }

    #[test]
    fn test_encode_update_setting() {
        let cmd = Command::update_setting("brightness", "7").unwrap();
        assert_eq!(cmd.encode(), "SET brightness 7");

        let cmd = Command::update_setting("nickname", "Player One").unwrap();
        assert_eq!(cmd.encode(), "SET nickname \"Player One\"");
        assert_eq!(cmd.name(), "SET");
    }

    #[test]
    fn test_update_setting_rejects_bad_arguments() {
        assert!(matches!(
            Command::update_setting("", "1"),
            Err(ProtocolError::InvalidArgument(_))
        ));
        assert!(matches!(
            Command::update_setting("two words", "1"),
            Err(ProtocolError::InvalidArgument(_))
        ));
        assert!(matches!(
            Command::update_setting("volume", "1\nPING"),
            Err(ProtocolError::InvalidArgument(_))
        ));
    }
}
