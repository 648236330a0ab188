//! AT-command engine for GSM modems
//!
//! This crate turns the byte stream of a GSM modem into structured events
//! (incoming SMS, status reports, USSD replies, calls) and turns outbound
//! intents into correctly sequenced AT transactions. SMS payloads are
//! encoded and decoded by `smsgate-pdu`.
//!
//! # Architecture
//!
//! 1. **Drivers** - named, inheritable tables of command and response
//!    templates ([`DriverRegistry`])
//! 2. **Matching** - classifying accumulated lines as OK, error or an
//!    expected pattern ([`ResponseMatcher`])
//! 3. **Processing** - extracting [`Prop`]s from replies and unsolicited
//!    notifications, resynchronizing fragmented output
//!    ([`ResponseProcessor`])
//! 4. **Scheduling** - an idle-gated FIFO ([`CommandQueue`]) and strictly
//!    sequential step chains ([`WorkChain`])
//! 5. **Session** - the per-modem actor tying it together
//!    ([`ModemSession`], [`ModemHandle`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Cargo.toml: smsgate-modem = { version = "0.1", features = ["serial"] }
//! use std::sync::Arc;
//! use smsgate_modem::{DriverRegistry, ModemConfigBuilder, ModemSession, SerialConfig, SerialTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = DriverRegistry::with_generic();
//!     registry.load("drivers.json")?;
//!
//!     let transport = SerialTransport::open(&SerialConfig::new("/dev/ttyUSB0"))?;
//!     let config = ModemConfigBuilder::new()
//!         .name("usb0")
//!         .country_code("62")
//!         .delete_message_on_read(true)
//!         .build();
//!
//!     let (session, handle, mut events) = ModemSession::new(transport, Arc::new(registry), config)?;
//!     tokio::spawn(session.run());
//!
//!     handle.send_message("+6281234567", "hello").await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port transport (requires `libudev-dev` on Linux)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod handle;
pub mod matcher;
pub mod processor;
pub mod queue;
pub mod reference;
pub mod session;
pub mod template;
pub mod transport;
pub mod work;

pub mod test_utils;

pub use config::{ModemConfig, ModemConfigBuilder, SerialConfig};
pub use driver::{DriverProfile, DriverRegistry, GENERIC_DRIVER};
pub use error::{ModemError, ModemErrorKind, Result};
pub use event::{
    DeviceInfo, Direction, InboundMessage, Locator, LogLine, ModemEvent, SentPdu, SessionStatus,
    SignalInfo, StatusFlags, StorageInfo,
};
pub use handle::{ModemHandle, Operation, SendReport};
pub use matcher::{MatchKind, MatchResult, ResponseMatcher, Template};
pub use processor::{Prop, ResponseProcessor};
pub use queue::CommandQueue;
pub use reference::{FileReferenceStore, MemoryReferenceStore, ReferenceStore};
pub use session::{ModemSession, TxRequest, TxResponse};
pub use transport::ModemTransport;
pub use work::WorkChain;

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

pub use test_utils::{MockController, MockTransport};

pub use config::{
    DEFAULT_BAUD_RATE, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_MONITOR_INTERVAL_SECS,
    DEFAULT_SEND_TIMEOUT_MS, DEFAULT_VALIDITY_MINUTES,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_COMMAND_TIMEOUT_MS, 5000);
        assert_eq!(DEFAULT_SEND_TIMEOUT_MS, 60000);
        assert_eq!(DEFAULT_BAUD_RATE, 115200);
    }
}
