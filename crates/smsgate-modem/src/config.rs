//! Per-modem session configuration
//!
//! Options the session consumes but does not own: storage handling, send
//! flags, monitor cadence and timeouts. Durations are written in humantime
//! form (`"5s"`, `"1m 30s"`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for one AT transaction
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Default timeout for the PDU commit step of a send
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 60000;

/// Default interval between signal/storage polls
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 60;

/// Default relative validity for sent messages (3 days)
pub const DEFAULT_VALIDITY_MINUTES: u32 = 3 * 24 * 60;

/// Default baud rate for serial modems
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Session configuration for one modem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Name used in logs and events
    pub name: String,

    /// Force a driver instead of fingerprinting the modem
    pub driver: Option<String>,

    /// Storage applied at init (`SM`, `ME`, `MT`, ...)
    pub default_storage: Option<String>,

    /// Country calling code used to normalize national numbers
    pub country_code: Option<String>,

    /// Delete messages from storage once dispatched
    pub delete_message_on_read: bool,

    /// Request delivery status reports for sent messages
    pub request_message_status: bool,

    /// Request a reply path for sent messages
    pub request_message_reply: bool,

    /// Send messages as class 0 (flash)
    pub send_message_as_flash: bool,

    /// Empty the storage when the modem reports it full
    pub empty_when_full: bool,

    /// Relative validity period for sent messages, in minutes
    pub validity_minutes: u32,

    /// Interval of the signal/storage poll (when the driver lacks
    /// unsolicited notifications)
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Timeout of one AT transaction
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Timeout of the PDU commit step
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,

    /// File persisting the concatenation reference counter
    pub reference_file: Option<PathBuf>,

    /// Command ids run best-effort before identification
    pub init_commands: Vec<String>,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            name: "modem".to_string(),
            driver: None,
            default_storage: None,
            country_code: None,
            delete_message_on_read: false,
            request_message_status: false,
            request_message_reply: false,
            send_message_as_flash: false,
            empty_when_full: false,
            validity_minutes: DEFAULT_VALIDITY_MINUTES,
            monitor_interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            reference_file: None,
            init_commands: vec![
                "CMD_RESET".to_string(),
                "CMD_ECHO_OFF".to_string(),
                "CMD_ERROR_VERBOSE".to_string(),
            ],
        }
    }
}

/// Serial port settings for the `serial` transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Path to serial port (e.g., /dev/ttyUSB0, COM3)
    pub port: PathBuf,
    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl SerialConfig {
    /// Settings for `port` at the default baud rate
    pub fn new(port: impl Into<PathBuf>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Builder for ModemConfig
#[derive(Debug, Default)]
pub struct ModemConfigBuilder {
    config: ModemConfig,
}

impl ModemConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Force a driver
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.config.driver = Some(driver.into());
        self
    }

    /// Set the storage applied at init
    pub fn default_storage(mut self, storage: impl Into<String>) -> Self {
        self.config.default_storage = Some(storage.into());
        self
    }

    /// Set the country calling code (with or without `+`)
    pub fn country_code(mut self, code: impl Into<String>) -> Self {
        self.config.country_code = Some(code.into().trim_start_matches('+').to_string());
        self
    }

    /// Delete messages once dispatched
    pub fn delete_message_on_read(mut self, enabled: bool) -> Self {
        self.config.delete_message_on_read = enabled;
        self
    }

    /// Request status reports
    pub fn request_message_status(mut self, enabled: bool) -> Self {
        self.config.request_message_status = enabled;
        self
    }

    /// Request a reply path
    pub fn request_message_reply(mut self, enabled: bool) -> Self {
        self.config.request_message_reply = enabled;
        self
    }

    /// Send as flash
    pub fn send_message_as_flash(mut self, enabled: bool) -> Self {
        self.config.send_message_as_flash = enabled;
        self
    }

    /// Empty storage when full
    pub fn empty_when_full(mut self, enabled: bool) -> Self {
        self.config.empty_when_full = enabled;
        self
    }

    /// Set validity in minutes
    pub fn validity_minutes(mut self, minutes: u32) -> Self {
        self.config.validity_minutes = minutes;
        self
    }

    /// Set the monitor poll interval
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.config.monitor_interval = interval;
        self
    }

    /// Set the transaction timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the commit timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Persist the reference counter in `path`
    pub fn reference_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.reference_file = Some(path.into());
        self
    }

    /// Replace the best-effort init command list
    pub fn init_commands<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.init_commands = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Build the configuration
    pub fn build(self) -> ModemConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
