//! Events a session emits and the state it exposes

use serde::{Deserialize, Serialize};
use smsgate_pdu::{CodingScheme, PduMessage, SmsTimestamp, StatusReport};

use crate::processor::Prop;

/// Where a message sits in modem storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    /// Storage name (`SM`, `ME`, ...)
    pub storage: String,
    /// Slot index
    pub index: u32,
}

impl Locator {
    /// Locator for `storage`/`index`
    pub fn new(storage: impl Into<String>, index: u32) -> Self {
        Self {
            storage: storage.into(),
            index,
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.storage, self.index)
    }
}

/// A received SMS, merged from its parts when concatenated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Hash shared by every part, stable across re-reads
    pub hash: String,
    /// Sender
    pub address: String,
    /// Service centre
    pub smsc: Option<String>,
    /// Timestamp of the first part
    pub timestamp: Option<SmsTimestamp>,
    /// Coding scheme of the first part
    pub scheme: CodingScheme,
    /// Class 0 message
    pub flash: bool,
    /// Full text
    pub text: String,
    /// Parts in index order
    pub parts: Vec<PduMessage>,
    /// Storage slots the parts were read from
    pub locations: Vec<Locator>,
}

impl InboundMessage {
    /// Whether the message arrived in several parts
    pub fn is_concatenated(&self) -> bool {
        self.parts.len() > 1
    }
}

/// One PDU accepted by the modem during a send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentPdu {
    /// Destination number
    pub destination: String,
    /// Hex PDU as written
    pub pdu: String,
    /// 1-based part index
    pub part: usize,
    /// Part count of the send
    pub total: usize,
    /// Message reference the network assigned (`+CMGS`)
    pub reference: Option<u8>,
    /// Hash of the full text, shared across parts
    pub hash: String,
}

/// Direction of a logged line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Written to the modem
    Tx,
    /// Read from the modem
    Rx,
}

/// A line of modem traffic for archival
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Session name
    pub modem: String,
    /// Direction
    pub direction: Direction,
    /// Line text, terminator stripped
    pub line: String,
}

/// Events broadcast by a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ModemEvent {
    /// A complete inbound message
    Message(InboundMessage),
    /// A delivery status report
    StatusReport(StatusReport),
    /// Incoming call
    Ring {
        /// Caller id, when presented
        caller: Option<String>,
    },
    /// An outgoing call was placed
    Dial {
        /// Dialed number
        number: String,
    },
    /// A USSD request was answered
    UssdDial {
        /// Requested code
        code: String,
        /// Decoded reply
        reply: Option<String>,
        /// Session status of the reply
        status: Option<u8>,
    },
    /// A PDU was committed by the modem
    Pdu(SentPdu),
    /// Status flags changed
    State {
        /// No flag set
        idle: bool,
        /// Flags currently set
        flags: StatusFlags,
    },
    /// Props extracted from modem output
    Props {
        /// Props in line order
        props: Vec<Prop>,
    },
    /// Raw traffic
    Log(LogLine),
}

/// Session status flags; the session is idle when none is set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    /// A transaction is in flight
    pub busy: bool,
    /// A send pipeline is running
    pub sending: bool,
    /// Inbound messages are being dispatched
    pub processing: bool,
}

impl StatusFlags {
    /// Whether no flag is set
    pub fn is_idle(&self) -> bool {
        !(self.busy || self.sending || self.processing)
    }
}

/// Identification strings reported at init
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// `+CGMI`
    pub manufacturer: Option<String>,
    /// `+CGMM`
    pub model: Option<String>,
    /// `+CGMR`
    pub version: Option<String>,
    /// `+CGSN`
    pub serial: Option<String>,
    /// `+CIMI`
    pub imsi: Option<String>,
    /// Caller id notifications enabled
    pub call: bool,
    /// New message notifications enabled
    pub sms: bool,
    /// USSD notifications enabled
    pub ussd: bool,
}

/// Storage usage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Active storage name
    pub name: Option<String>,
    /// Used slots
    pub used: u32,
    /// Total slots
    pub total: u32,
}

/// Signal quality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalInfo {
    /// RSSI index 0-31, 99 unknown
    pub rssi: u8,
    /// Bit error rate
    pub ber: Option<u8>,
}

impl SignalInfo {
    /// RSSI in dBm, when known
    pub fn dbm(&self) -> Option<i16> {
        (self.rssi <= 31).then(|| -113 + 2 * i16::from(self.rssi))
    }
}

/// Snapshot of a session, readable through the handle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session name
    pub name: String,
    /// Active driver
    pub driver: String,
    /// Status flags
    pub flags: StatusFlags,
    /// Queued operations
    pub queue_depth: usize,
    /// Init finished
    pub initialized: bool,
    /// Identification
    pub device: DeviceInfo,
    /// Storage usage
    pub storage: StorageInfo,
    /// Last signal reading
    pub signal: Option<SignalInfo>,
    /// Service centre
    pub smsc: Option<String>,
    /// Operator
    pub network: Option<String>,
    /// TE character set
    pub charset: Option<String>,
    /// Modem in PDU mode
    pub pdu_mode: Option<bool>,
    /// Storage full, awaiting remediation
    pub memory_full: bool,
}

impl SessionStatus {
    /// Whether no status flag is set
    pub fn idle(&self) -> bool {
        self.flags.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_idle() {
        let mut flags = StatusFlags::default();
        assert!(flags.is_idle());
        flags.processing = true;
        assert!(!flags.is_idle());
    }

    #[test]
    fn test_signal_dbm() {
        assert_eq!(SignalInfo { rssi: 0, ber: None }.dbm(), Some(-113));
        assert_eq!(SignalInfo { rssi: 31, ber: None }.dbm(), Some(-51));
        assert_eq!(SignalInfo { rssi: 99, ber: None }.dbm(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = ModemEvent::Ring {
            caller: Some("+628123".into()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"ring","caller":"+628123"}"#);
    }
}
