//! Byte-stream transports a session drives
//!
//! The session only needs a duplex byte stream that is already open:
//!
//! - [`SerialTransport`] - a serial port via tokio-serial (requires the
//!   `serial` feature)
//! - [`MockTransport`](crate::test_utils::MockTransport) - scripted replies
//!   for tests
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   apt install libudev-dev pkg-config
//!   ```

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Duplex byte stream to a modem
///
/// `read` must be cancel safe: the session races it against handle
/// commands and timers, and a dropped read must not lose data.
#[async_trait]
pub trait ModemTransport: Send {
    /// Write bytes and flush
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Wait for the next chunk of bytes
    ///
    /// Returns `None` once the stream is closed.
    async fn read(&mut self) -> Result<Option<Bytes>>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: ModemTransport + ?Sized> ModemTransport for Box<T> {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data).await
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        (**self).read().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
