//! Error types for modem sessions
//!
//! Transport failures, protocol timeouts, error-class modem replies, codec
//! failures and driver configuration problems all land in [`ModemError`].
//! Only configuration errors are fatal; everything else rejects the one
//! operation that caused it.

use serde::{Deserialize, Serialize};
use smsgate_pdu::CodecError;
use thiserror::Error;

/// Error-class final result codes a modem can answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModemErrorKind {
    /// Plain `ERROR`
    Error,
    /// `NO CARRIER`
    NoCarrier,
    /// `COMMAND NOT SUPPORT`
    NotSupported,
    /// `+CME ERROR: <code>` (equipment)
    Cme,
    /// `+CMS ERROR: <code>` (message service)
    Cms,
}

impl std::fmt::Display for ModemErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModemErrorKind::Error => write!(f, "ERROR"),
            ModemErrorKind::NoCarrier => write!(f, "NO CARRIER"),
            ModemErrorKind::NotSupported => write!(f, "COMMAND NOT SUPPORT"),
            ModemErrorKind::Cme => write!(f, "CME ERROR"),
            ModemErrorKind::Cms => write!(f, "CMS ERROR"),
        }
    }
}

/// Main error type for modem operations
#[derive(Error, Debug)]
pub enum ModemError {
    // ===== Transport Errors =====
    /// Serial port open failed
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed {
        /// Port path
        port: String,
        /// Failure reason
        reason: String,
    },

    /// Transport write error
    #[error("Transport write error: {0}")]
    WriteError(String),

    /// Transport read error
    #[error("Transport read error: {0}")]
    ReadError(String),

    /// Transport closed by the other side
    #[error("Transport disconnected")]
    Disconnected,

    // ===== Protocol Errors =====
    /// No conclusive reply before the deadline
    #[error("No response after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// The modem answered with an error-class result code
    #[error("Modem replied {kind}{}: {diagnostic}", .code.map(|c| format!(" {}", c)).unwrap_or_default())]
    Modem {
        /// Which error result code matched
        kind: ModemErrorKind,
        /// Numeric CME/CMS code when the modem reports one
        code: Option<u16>,
        /// Raw diagnostic line
        diagnostic: String,
    },

    /// PDU encode/decode failure
    #[error("PDU codec error: {0}")]
    Codec(#[from] CodecError),

    // ===== Configuration Errors =====
    /// A driver with this name is already registered
    #[error("Duplicate driver: {0}")]
    DuplicateDriver(String),

    /// No driver with this name is registered
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    /// Malformed driver document
    #[error("Invalid driver configuration: {0}")]
    InvalidDriverConfig(String),

    /// The active driver has no template for this id
    #[error("Driver has no command {0}")]
    UnknownCommand(String),

    // ===== General Errors =====
    /// Session actor is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModemError {
    /// Check if retrying the same operation may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ModemError::Timeout { .. } | ModemError::ReadError(_) | ModemError::WriteError(_)
        )
    }

    /// Check if this is a configuration error (fatal at load time)
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ModemError::DuplicateDriver(_)
                | ModemError::UnknownDriver(_)
                | ModemError::InvalidDriverConfig(_)
        )
    }

    /// Check if the modem itself rejected the command
    pub fn is_modem_error(&self) -> bool {
        matches!(self, ModemError::Modem { .. })
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            ModemError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            ModemError::WriteError(_) => "WRITE_ERROR",
            ModemError::ReadError(_) => "READ_ERROR",
            ModemError::Disconnected => "DISCONNECTED",
            ModemError::Timeout { .. } => "TIMEOUT",
            ModemError::Modem { kind, .. } => match kind {
                ModemErrorKind::Error => "MODEM_ERROR",
                ModemErrorKind::NoCarrier => "NO_CARRIER",
                ModemErrorKind::NotSupported => "NOT_SUPPORTED",
                ModemErrorKind::Cme => "CME_ERROR",
                ModemErrorKind::Cms => "CMS_ERROR",
            },
            ModemError::Codec(e) => e.error_code(),
            ModemError::DuplicateDriver(_) => "DUPLICATE_DRIVER",
            ModemError::UnknownDriver(_) => "UNKNOWN_DRIVER",
            ModemError::InvalidDriverConfig(_) => "INVALID_DRIVER_CONFIG",
            ModemError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            ModemError::ChannelClosed => "CHANNEL_CLOSED",
            ModemError::Io(_) => "IO_ERROR",
            ModemError::Json(_) => "JSON_ERROR",
        }
    }
}

/// Result type alias for modem operations
pub type Result<T> = std::result::Result<T, ModemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModemError::Timeout { duration_ms: 5000 };
        assert_eq!(err.to_string(), "No response after 5000ms");

        let err = ModemError::Modem {
            kind: ModemErrorKind::Cme,
            code: Some(100),
            diagnostic: "+CME ERROR: 100".to_string(),
        };
        assert_eq!(err.to_string(), "Modem replied CME ERROR 100: +CME ERROR: 100");

        let err = ModemError::Modem {
            kind: ModemErrorKind::Error,
            code: None,
            diagnostic: "ERROR".to_string(),
        };
        assert_eq!(err.to_string(), "Modem replied ERROR: ERROR");
    }

    #[test]
    fn test_error_classification() {
        assert!(ModemError::Timeout { duration_ms: 1 }.is_retriable());
        assert!(!ModemError::Disconnected.is_retriable());
        assert!(ModemError::DuplicateDriver("generic".into()).is_config_error());
        assert!(!ModemError::ChannelClosed.is_config_error());
        assert!(ModemError::Modem {
            kind: ModemErrorKind::Cms,
            code: Some(500),
            diagnostic: String::new(),
        }
        .is_modem_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ModemError::Disconnected.error_code(), "DISCONNECTED");
        assert_eq!(
            ModemError::Codec(CodecError::OutOfRange('中')).error_code(),
            CodecError::OutOfRange('中').error_code()
        );
        assert_eq!(
            ModemError::UnknownCommand("CMD_X".into()).error_code(),
            "UNKNOWN_COMMAND"
        );
    }
}
