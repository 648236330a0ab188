//! Error types for PDU encoding and decoding

use thiserror::Error;

/// Errors raised by the PDU codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Character has no representation in the GSM 7-bit alphabet
    #[error("Character {0:?} is not representable in the GSM 7-bit alphabet")]
    UnmappableCharacter(char),

    /// Character does not fit in a single octet
    #[error("Character {0:?} exceeds the 8-bit range")]
    OutOfRange(char),

    /// PDU ended before a field could be read
    #[error("PDU truncated while reading {field}: need {needed} octets, have {available}")]
    Truncated {
        /// Field being decoded
        field: &'static str,
        /// Octets required
        needed: usize,
        /// Octets remaining
        available: usize,
    },

    /// Timestamp fields must be exactly seven octets
    #[error("Timestamp must be 7 octets, got {0}")]
    TimestampLength(usize),

    /// Hex text could not be parsed
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Address digits could not be encoded
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Message type indicator is not deliver, submit or status report
    #[error("Unsupported message type indicator: {0}")]
    UnsupportedMessageType(u8),

    /// User data does not fit one PDU
    #[error("User data of {length} {unit} exceeds the {limit} {unit} limit")]
    UserDataTooLong {
        /// Encoded length, header included
        length: usize,
        /// Maximum for the scheme
        limit: usize,
        /// `septets` or `octets`
        unit: &'static str,
    },

    /// Concatenation header is inconsistent
    #[error("Invalid user data header: {0}")]
    InvalidHeader(String),
}

impl CodecError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CodecError::UnmappableCharacter(_) => "UNMAPPABLE_CHARACTER",
            CodecError::OutOfRange(_) => "OUT_OF_RANGE",
            CodecError::Truncated { .. } => "TRUNCATED",
            CodecError::TimestampLength(_) => "TIMESTAMP_LENGTH",
            CodecError::InvalidHex(_) => "INVALID_HEX",
            CodecError::InvalidAddress(_) => "INVALID_ADDRESS",
            CodecError::UnsupportedMessageType(_) => "UNSUPPORTED_MESSAGE_TYPE",
            CodecError::UserDataTooLong { .. } => "USER_DATA_TOO_LONG",
            CodecError::InvalidHeader(_) => "INVALID_HEADER",
        }
    }
}

impl From<hex::FromHexError> for CodecError {
    fn from(err: hex::FromHexError) -> Self {
        CodecError::InvalidHex(err.to_string())
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CodecError::UnmappableCharacter('中').error_code(),
            "UNMAPPABLE_CHARACTER"
        );
        assert_eq!(CodecError::TimestampLength(6).error_code(), "TIMESTAMP_LENGTH");
    }

    #[test]
    fn test_truncated_message() {
        let err = CodecError::Truncated {
            field: "address",
            needed: 4,
            available: 2,
        };
        assert!(err.to_string().contains("address"));
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_from_hex_error() {
        let err: CodecError = hex::decode("zz").unwrap_err().into();
        assert_eq!(err.error_code(), "INVALID_HEX");
    }
}
