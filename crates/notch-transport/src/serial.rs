//! Serial port endpoints (tokio-serial)

use std::io;

use async_trait::async_trait;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::info;

use crate::endpoint::{Endpoint, EndpointProvider, LinkSettings};

/// Opens a named serial device, e.g. `/dev/ttyACM0` or `COM3`.
#[derive(Debug, Clone)]
pub struct SerialProvider {
    path: String,
}

impl SerialProvider {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl EndpointProvider for SerialProvider {
    fn is_supported(&self) -> bool {
        cfg!(any(unix, windows))
    }

    async fn open(&self, settings: &LinkSettings) -> io::Result<Box<dyn Endpoint>> {
        if self.path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no serial port selected",
            ));
        }

        let stream = tokio_serial::new(&self.path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;

        info!(port = %self.path, baud = settings.baud_rate, "Serial port opened");
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.path)
    }
}
