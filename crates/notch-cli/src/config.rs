//! Configuration file support
//!
//! ```toml
//! port = "/dev/ttyACM0"
//! baud_rate = 9600
//!
//! [timeouts]
//! handshake_ms = 10000
//! command_ms = 5000
//! settle_ms = 2000
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use notch_protocol::HandlerConfig;
use notch_transport::DEFAULT_BAUD_RATE;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Serial device path
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeouts: HandlerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeouts: HandlerConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
            port = "/dev/ttyACM0"
            baud_rate = 115200

            [timeouts]
            handshake_ms = 3000
            command_ms = 750
            settle_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeouts.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.timeouts.command_timeout, Duration::from_millis(750));
        assert!(config.timeouts.settle_delay.is_zero());
    }

    #[test]
    fn test_parse_defaults() {
        let config = Config::parse("[timeouts]\ncommand_ms = 100\n").unwrap();
        assert_eq!(config.port, None);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeouts.command_timeout, Duration::from_millis(100));
        assert_eq!(config.timeouts.settle_delay, Duration::from_secs(2));

        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        assert!(Config::parse("host = \"127.0.0.1\"").is_err());
        assert!(Config::parse("[timeouts]\ncommand_timeout = 1\n").is_err());
    }
}
