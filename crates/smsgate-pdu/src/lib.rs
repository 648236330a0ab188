//! SMS PDU codec for GSM modems
//!
//! Encodes SMS-SUBMIT PDUs for `AT+CMGS` and decodes the SMS-DELIVER,
//! SMS-SUBMIT and SMS-STATUS-REPORT PDUs a modem hands back from `+CMGR`,
//! `+CMGL`, `+CMT` and `+CDS`.
//!
//! # Layout
//!
//! - [`alphabet`] - GSM 03.38 default alphabet, extension table, septet packing
//! - [`address`] - semi-octet phone numbers, SMSC prefix, normalization
//! - [`timestamp`] - TP-SCTS timestamps and TP-VP validity periods
//! - [`udh`] - concatenation headers
//! - [`scheme`] - coding scheme detection and message splitting
//! - [`pdu`] - whole-PDU decode and submit encode
//!
//! # Example
//!
//! ```rust
//! use smsgate_pdu::{decode, sms_split, CodingScheme, Decoded, SmsSubmit};
//!
//! let submit = SmsSubmit::new("+6281234567", "hello");
//! let encoded = submit.encode().unwrap();
//! assert_eq!(encoded.tp_length, 18);
//!
//! match decode(&encoded.hex).unwrap() {
//!     Decoded::Message(msg) => assert_eq!(msg.text, "hello"),
//!     Decoded::StatusReport(_) => unreachable!(),
//! }
//!
//! let parts = sms_split(&"x".repeat(200), CodingScheme::Gsm7).unwrap();
//! assert_eq!(parts.len(), 2);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod address;
pub mod alphabet;
pub mod error;
pub mod pdu;
pub mod scheme;
pub mod timestamp;
pub mod udh;

pub use address::{normalize_number, Address, TYPE_INTERNATIONAL, TYPE_NATIONAL};
pub use error::{CodecError, Result};
pub use pdu::{
    decode, message_hash, tp_length, validate_destination, Decoded, EncodedPdu, MessageType,
    PduMessage, SmsSubmit, StatusReport,
};
pub use scheme::{sms_split, sms_split_with_header, CodingScheme};
pub use timestamp::{SmsTimestamp, Validity};
pub use udh::Concatenation;
