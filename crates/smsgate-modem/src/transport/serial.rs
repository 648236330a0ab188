//! Serial port transport

use crate::config::SerialConfig;
use crate::error::{ModemError, Result};
use crate::transport::ModemTransport;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{error, info, trace};

/// Buffer size for reading from serial port
const READ_BUFFER_SIZE: usize = 1024;

/// An open serial port
pub struct SerialTransport {
    port_path: PathBuf,
    baud_rate: u32,
    stream: SerialStream,
    name: String,
}

impl SerialTransport {
    /// Open the port described by `config`
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port_path = config.port.clone();
        if !port_path.exists() {
            return Err(ModemError::PortOpenFailed {
                port: port_path.display().to_string(),
                reason: "no such device".to_string(),
            });
        }

        info!(port = %port_path.display(), baud = config.baud_rate, "Opening serial port");
        let stream = tokio_serial::new(port_path.to_string_lossy(), config.baud_rate)
            .open_native_async()
            .map_err(|e| ModemError::PortOpenFailed {
                port: port_path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: format!("serial:{}", port_path.display()),
            port_path,
            baud_rate: config.baud_rate,
            stream,
        })
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }
}

#[async_trait]
impl ModemTransport for SerialTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await.map_err(|e| {
            error!(error = %e, "Serial write error");
            ModemError::WriteError(e.to_string())
        })?;
        self.stream
            .flush()
            .await
            .map_err(|e| ModemError::WriteError(format!("Flush failed: {}", e)))
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    trace!(bytes = n, "Read from serial port");
                    return Ok(Some(Bytes::copy_from_slice(&buf[..n])));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    error!(error = %e, "Serial read error");
                    return Err(ModemError::ReadError(e.to_string()));
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}
