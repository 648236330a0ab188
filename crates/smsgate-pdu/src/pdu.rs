//! SMS-DELIVER / SMS-SUBMIT / SMS-STATUS-REPORT encoding and decoding
//!
//! Decoding walks the optional SMSC prefix, the first octet (message type in
//! the low two bits), the message reference for submit and status-report
//! PDUs, the address, then either the report timestamps and status or the
//! PID, DCS, timestamp/validity and user data. Encoding only produces
//! SMS-SUBMIT PDUs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::address::{self, decode_number, decode_smsc, encode_number, normalize_number};
use crate::alphabet;
use crate::error::{CodecError, Result};
use crate::scheme::CodingScheme;
use crate::timestamp::{SmsTimestamp, Validity, TIMESTAMP_OCTETS};
use crate::udh::{self, Concatenation, UserDataHeader};

/// First-octet flag: reply path
const FLAG_REPLY_PATH: u8 = 0x80;
/// First-octet flag: user data header indicator
const FLAG_UDHI: u8 = 0x40;
/// First-octet flag: status report request / indication
const FLAG_STATUS_REPORT: u8 = 0x20;
/// First-octet value for TP-VPF relative
const VPF_RELATIVE: u8 = 0x10;

/// Message type indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// SMS-DELIVER (network to handset)
    Deliver,
    /// SMS-SUBMIT (handset to network)
    Submit,
    /// SMS-STATUS-REPORT
    StatusReport,
}

impl MessageType {
    fn from_first_octet(octet: u8) -> Result<Self> {
        match octet & 0x03 {
            0x00 => Ok(MessageType::Deliver),
            0x01 => Ok(MessageType::Submit),
            0x02 => Ok(MessageType::StatusReport),
            other => Err(CodecError::UnsupportedMessageType(other)),
        }
    }
}

/// A decoded (or freshly encoded) short message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PduMessage {
    /// Deliver or submit
    pub message_type: MessageType,
    /// Service centre address from the PDU prefix
    pub smsc: Option<String>,
    /// Originator (deliver) or destination (submit)
    pub address: String,
    /// Type-of-address octet of `address`
    pub address_type: u8,
    /// TP-MR (submit only)
    pub reference: Option<u8>,
    /// Alphabet of the user data
    pub scheme: CodingScheme,
    /// Message class 0 (flash)
    pub flash: bool,
    /// Service centre timestamp (deliver only)
    pub timestamp: Option<SmsTimestamp>,
    /// Validity period (submit only)
    pub validity: Validity,
    /// Concatenation info when the message is one part of several
    pub concatenation: Option<Concatenation>,
    /// Status report requested (submit) or indicated (deliver)
    pub status_report: bool,
    /// Reply path flag
    pub reply_path: bool,
    /// Decoded text
    pub text: String,
    /// Raw PDU in upper-case hex
    pub pdu: String,
    /// Content hash used for idempotent storage downstream
    pub hash: String,
}

impl PduMessage {
    /// Recompute the hash with a country code used to normalize the address
    pub fn rehash(&mut self, country_code: Option<&str>) {
        self.hash = message_hash(
            self.timestamp.as_ref(),
            &normalize_number(&self.address, country_code),
            &self.text,
        );
    }
}

/// A decoded delivery status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Service centre address from the PDU prefix
    pub smsc: Option<String>,
    /// TP-MR of the submitted message this report refers to
    pub reference: u8,
    /// Recipient of the original message
    pub recipient: String,
    /// Time the service centre received the original message
    pub sent: SmsTimestamp,
    /// Time of delivery (or of the last attempt)
    pub discharged: SmsTimestamp,
    /// TP-ST status octet
    pub status: u8,
    /// Raw PDU in upper-case hex
    pub pdu: String,
}

impl StatusReport {
    /// Whether the message reached the recipient
    pub fn is_delivered(&self) -> bool {
        self.status == 0
    }

    /// Whether the service centre is still trying (temporary error class)
    pub fn is_pending(&self) -> bool {
        (0x20..0x40).contains(&self.status)
    }
}

/// Result of decoding a PDU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Decoded {
    /// Deliver or submit message
    Message(PduMessage),
    /// Status report
    StatusReport(StatusReport),
}

/// Hash of timestamp, normalized address and content
pub fn message_hash(timestamp: Option<&SmsTimestamp>, address: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(ts) = timestamp {
        hasher.update(ts.to_string().as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(address.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// TP length (octets after the SMSC prefix) of a hex PDU
///
/// This is the length the modem declares in `+CMGR`/`+CMGL`/`+CMT` headers
/// and expects in `AT+CMGS=<length>`.
pub fn tp_length(hex_pdu: &str) -> Option<usize> {
    let hex_pdu = hex_pdu.trim();
    if hex_pdu.len() < 2 || hex_pdu.len() % 2 != 0 {
        return None;
    }
    if !hex_pdu.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let smsc_len = usize::from_str_radix(&hex_pdu[..2], 16).ok()?;
    (hex_pdu.len() / 2).checked_sub(smsc_len + 1)
}

/// Cursor over PDU octets with field-named bounds errors
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or(CodecError::Truncated {
                field,
                needed: n,
                available: self.data.len().saturating_sub(self.pos),
            })?;
        self.pos += n;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

/// Decode a hex PDU as read from the modem
pub fn decode(hex_pdu: &str) -> Result<Decoded> {
    let raw = hex_pdu.trim().to_ascii_uppercase();
    let bytes = hex::decode(&raw)?;
    let (smsc, smsc_len) = decode_smsc(&bytes)?;
    let smsc = smsc.map(|a| a.number);
    let mut r = Reader {
        data: &bytes,
        pos: smsc_len,
    };

    let first = r.byte("first octet")?;
    let message_type = MessageType::from_first_octet(first)?;
    trace!(?message_type, first = first, "decoding pdu");

    let reference = match message_type {
        MessageType::Deliver => None,
        _ => Some(r.byte("message reference")?),
    };

    let (addr, used) = decode_number(r.rest())?;
    r.pos += used;

    if message_type == MessageType::StatusReport {
        let sent = SmsTimestamp::decode(r.take(TIMESTAMP_OCTETS, "service centre timestamp")?)?;
        let discharged = SmsTimestamp::decode(r.take(TIMESTAMP_OCTETS, "discharge time")?)?;
        let status = r.byte("status")?;
        return Ok(Decoded::StatusReport(StatusReport {
            smsc,
            reference: reference.unwrap_or(0),
            recipient: addr.number,
            sent,
            discharged,
            status,
            pdu: raw,
        }));
    }

    let _pid = r.byte("protocol identifier")?;
    let dcs = r.byte("data coding scheme")?;
    let scheme = CodingScheme::from_dcs(dcs);
    let flash = (dcs & 0xD0 == 0x10 || dcs & 0xF0 == 0xF0) && dcs & 0x03 == 0x00;

    let (timestamp, validity) = match message_type {
        MessageType::Deliver => (
            Some(SmsTimestamp::decode(
                r.take(TIMESTAMP_OCTETS, "service centre timestamp")?,
            )?),
            Validity::None,
        ),
        _ => {
            let validity = match (first >> 3) & 0x03 {
                0x02 => Validity::Relative(r.byte("validity")?),
                0x01 => {
                    let mut enhanced = [0u8; 7];
                    enhanced.copy_from_slice(r.take(7, "validity")?);
                    Validity::Enhanced(enhanced)
                }
                0x03 => Validity::Absolute(SmsTimestamp::decode(r.take(7, "validity")?)?),
                _ => Validity::None,
            };
            (None, validity)
        }
    };

    let udl = r.byte("user data length")? as usize;
    let (concatenation, text) = decode_user_data(r.rest(), udl, scheme, first & FLAG_UDHI != 0)?;

    let hash = message_hash(
        timestamp.as_ref(),
        &normalize_number(&addr.number, None),
        &text,
    );

    Ok(Decoded::Message(PduMessage {
        message_type,
        smsc,
        address: addr.number,
        address_type: addr.type_of_address,
        reference,
        scheme,
        flash,
        timestamp,
        validity,
        concatenation,
        status_report: first & FLAG_STATUS_REPORT != 0,
        reply_path: first & FLAG_REPLY_PATH != 0,
        text,
        pdu: raw,
        hash,
    }))
}

fn decode_user_data(
    ud: &[u8],
    udl: usize,
    scheme: CodingScheme,
    has_header: bool,
) -> Result<(Option<Concatenation>, String)> {
    let header = if has_header {
        Some(UserDataHeader::decode(ud)?)
    } else {
        None
    };
    let concatenation = header.as_ref().and_then(|h| h.concatenation);
    let header_len = header.as_ref().map_or(0, |h| h.length);

    let text = match scheme {
        CodingScheme::Gsm7 => {
            let count = udl.saturating_sub(udh::header_septets(header_len));
            let fill = if header_len > 0 {
                udh::fill_bits(header_len)
            } else {
                0
            };
            let septets = alphabet::unpack(&ud[header_len..], count, fill)?;
            alphabet::from_septets(&septets)
        }
        CodingScheme::Data8 | CodingScheme::Ucs2 => {
            let data = ud.get(..udl).ok_or(CodecError::Truncated {
                field: "user data",
                needed: udl,
                available: ud.len(),
            })?;
            let payload = data.get(header_len..).unwrap_or_default();
            if scheme == CodingScheme::Data8 {
                payload.iter().map(|&b| b as char).collect()
            } else {
                decode_ucs2(payload)
            }
        }
    };
    Ok((concatenation, text))
}

/// Decode big-endian UTF-16 octets
pub fn decode_ucs2(octets: &[u8]) -> String {
    let units: Vec<u16> = octets
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode text as big-endian UTF-16 octets
pub fn encode_ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

/// An encoded SMS-SUBMIT ready for `AT+CMGS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPdu {
    /// PDU in upper-case hex, including the empty SMSC prefix
    pub hex: String,
    /// Octet count after the SMSC prefix
    pub tp_length: usize,
}

/// Parameters of one SMS-SUBMIT PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsSubmit {
    /// Destination number (`+` for international)
    pub destination: String,
    /// Text of this part
    pub text: String,
    /// Alphabet to encode with
    pub scheme: CodingScheme,
    /// Concatenation info for multipart sends
    pub concatenation: Option<Concatenation>,
    /// Relative validity period in minutes
    pub validity_minutes: u32,
    /// Request a delivery status report
    pub request_status: bool,
    /// Request a reply path
    pub request_reply: bool,
    /// Send as class 0 (flash)
    pub flash: bool,
}

impl SmsSubmit {
    /// Submit with default flags and a three-day validity
    pub fn new(destination: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            destination: destination.into(),
            scheme: CodingScheme::detect(&text),
            text,
            concatenation: None,
            validity_minutes: 3 * 24 * 60,
            request_status: false,
            request_reply: false,
            flash: false,
        }
    }

    /// Encode to hex
    pub fn encode(&self) -> Result<EncodedPdu> {
        let mut first = 0x01 | VPF_RELATIVE;
        if self.request_status {
            first |= FLAG_STATUS_REPORT;
        }
        if self.concatenation.is_some() {
            first |= FLAG_UDHI;
        }
        if self.request_reply {
            first |= FLAG_REPLY_PATH;
        }

        let header = self
            .concatenation
            .map(|c| c.encode_header())
            .unwrap_or_default();
        let (udl, user_data) = self.encode_user_data(&header)?;
        let (limit, unit) = match self.scheme {
            CodingScheme::Gsm7 => (160, "septets"),
            CodingScheme::Data8 | CodingScheme::Ucs2 => (140, "octets"),
        };
        if udl > limit {
            return Err(CodecError::UserDataTooLong {
                length: udl,
                limit,
                unit,
            });
        }

        let mut tpdu = Vec::with_capacity(16 + user_data.len());
        tpdu.push(first);
        // TP-MR: left to the modem
        tpdu.push(0x00);
        tpdu.extend(encode_number(&self.destination)?);
        tpdu.push(0x00);
        tpdu.push(self.scheme.dcs(self.flash));
        tpdu.push(crate::timestamp::validity_index(self.validity_minutes));
        tpdu.push(udl as u8);
        tpdu.extend(user_data);

        let tp_length = tpdu.len();
        let mut hex = String::with_capacity(2 + tp_length * 2);
        hex.push_str("00");
        hex.push_str(&hex::encode_upper(&tpdu));
        Ok(EncodedPdu { hex, tp_length })
    }

    fn encode_user_data(&self, header: &[u8]) -> Result<(usize, Vec<u8>)> {
        match self.scheme {
            CodingScheme::Gsm7 => {
                if header.is_empty() {
                    let (octets, count) = alphabet::encode(&self.text)?;
                    return Ok((count, octets));
                }
                let septets = alphabet::to_septets(&self.text)?;
                let mut ud = header.to_vec();
                ud.extend(alphabet::pack(&septets, udh::fill_bits(header.len())));
                Ok((udh::header_septets(header.len()) + septets.len(), ud))
            }
            CodingScheme::Data8 => {
                let mut ud = header.to_vec();
                for c in self.text.chars() {
                    let value = u8::try_from(c as u32).map_err(|_| CodecError::OutOfRange(c))?;
                    ud.push(value);
                }
                Ok((ud.len(), ud))
            }
            CodingScheme::Ucs2 => {
                let mut ud = header.to_vec();
                ud.extend(encode_ucs2(&self.text));
                Ok((ud.len(), ud))
            }
        }
    }
}

/// Check that an address would encode, without building a PDU
pub fn validate_destination(number: &str) -> Result<()> {
    address::encode_number(number).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DELIVER: &str = "0691261801000004048122550000115071015064827BD3E6140495BF410A45CC059A96E5F6F4B80C4ABACD6F85CC050AD6E96F90B40C67E71533178898B697E5749082E6020DDFF0BCA2E60209D9E1F11AC44CCFE90A9B0B7445A7E96510333DA72B14D372BB1E064D9B531039CC0EB741F3F27C9E7EBB4169771A749687E9E9B90B";

    fn as_message(decoded: Decoded) -> PduMessage {
        match decoded {
            Decoded::Message(m) => m,
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_sample_deliver() {
        let msg = as_message(decode(SAMPLE_DELIVER).unwrap());
        assert_eq!(msg.message_type, MessageType::Deliver);
        assert_eq!(msg.smsc.as_deref(), Some("+6281100000"));
        assert!(msg.smsc.unwrap().starts_with('+'));
        assert_eq!(msg.address, "2255");
        assert_eq!(msg.scheme, CodingScheme::Gsm7);
        assert!(msg.text.starts_with("SMS Pro"));
        assert!(msg.text.ends_with("gratis."));
        assert_eq!(msg.timestamp.unwrap().to_string(), "2011-05-17T10:05:46+07:00");
        assert_eq!(msg.hash.len(), 64);
    }

    #[test]
    fn test_tp_length() {
        assert_eq!(tp_length(SAMPLE_DELIVER), Some(123));
        assert_eq!(tp_length("0011000A"), Some(3));
        assert_eq!(tp_length("0G"), None);
        assert_eq!(tp_length("001"), None);
    }

    #[test]
    fn test_encode_simple_submit() {
        let mut submit = SmsSubmit::new("+6281234567", "hello");
        submit.validity_minutes = 4 * 24 * 60;
        let encoded = submit.encode().unwrap();
        assert_eq!(encoded.hex, "0011000A9126183254760000AA05E8329BFD06");
        assert_eq!(encoded.tp_length, 18);
        assert_eq!(tp_length(&encoded.hex), Some(18));
    }

    #[test]
    fn test_submit_flags() {
        let mut submit = SmsSubmit::new("12345", "x");
        submit.request_status = true;
        submit.request_reply = true;
        submit.flash = true;
        let msg = as_message(decode(&submit.encode().unwrap().hex).unwrap());
        assert_eq!(msg.message_type, MessageType::Submit);
        assert!(msg.status_report);
        assert!(msg.reply_path);
        assert!(msg.flash);
        assert_eq!(msg.validity.minutes(), Some(3 * 24 * 60));
    }

    #[test]
    fn test_concatenated_7bit_roundtrip() {
        let mut submit = SmsSubmit::new("+447700900123", "Part two of the {message}");
        submit.concatenation = Some(Concatenation {
            reference: 7,
            total: 2,
            index: 2,
        });
        let msg = as_message(decode(&submit.encode().unwrap().hex).unwrap());
        assert_eq!(msg.text, "Part two of the {message}");
        assert_eq!(msg.concatenation, submit.concatenation);
        assert_eq!(msg.address, "+447700900123");
    }

    #[test]
    fn test_ucs2_with_16bit_reference() {
        let mut submit = SmsSubmit::new("+6281234567", "Привет, мир");
        assert_eq!(submit.scheme, CodingScheme::Ucs2);
        submit.concatenation = Some(Concatenation {
            reference: 0x0102,
            total: 3,
            index: 1,
        });
        let msg = as_message(decode(&submit.encode().unwrap().hex).unwrap());
        assert_eq!(msg.text, "Привет, мир");
        assert_eq!(msg.concatenation.unwrap().reference, 0x0102);
    }

    #[test]
    fn test_data8_roundtrip() {
        let submit = SmsSubmit::new("0812", "naïve");
        assert_eq!(submit.scheme, CodingScheme::Data8);
        let msg = as_message(decode(&submit.encode().unwrap().hex).unwrap());
        assert_eq!(msg.text, "naïve");
    }

    #[test]
    fn test_16bit_reference_part_limits() {
        let concat = Concatenation {
            reference: 0x1234,
            total: 2,
            index: 1,
        };
        let mut submit = SmsSubmit::new("+6281234567", "a".repeat(153));
        submit.concatenation = Some(concat);
        assert_eq!(
            submit.encode().unwrap_err(),
            CodecError::UserDataTooLong {
                length: 161,
                limit: 160,
                unit: "septets"
            }
        );

        submit.text = "a".repeat(152);
        let msg = as_message(decode(&submit.encode().unwrap().hex).unwrap());
        assert_eq!(msg.text, "a".repeat(152));

        let mut data = SmsSubmit::new("+6281234567", "ï".repeat(134));
        data.concatenation = Some(concat);
        assert!(matches!(
            data.encode(),
            Err(CodecError::UserDataTooLong { length: 141, .. })
        ));
    }

    #[test]
    fn test_encode_rejects_unmappable() {
        let mut submit = SmsSubmit::new("0812", "中");
        submit.scheme = CodingScheme::Gsm7;
        assert_eq!(
            submit.encode().unwrap_err(),
            CodecError::UnmappableCharacter('中')
        );
        submit.scheme = CodingScheme::Data8;
        assert_eq!(submit.encode().unwrap_err(), CodecError::OutOfRange('中'));
    }

    #[test]
    fn test_decode_status_report() {
        let hex = "00062A0A912618325476115071015064821150710151648200";
        match decode(hex).unwrap() {
            Decoded::StatusReport(report) => {
                assert_eq!(report.reference, 0x2A);
                assert_eq!(report.recipient, "+6281234567");
                assert_eq!(report.discharged.minute, 15);
                assert!(report.is_delivered());
                assert!(!report.is_pending());
            }
            other => panic!("expected status report, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            decode("0004048122"),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            decode("0007"),
            Err(CodecError::UnsupportedMessageType(3))
        ));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = as_message(decode(SAMPLE_DELIVER).unwrap());
        let b = as_message(decode(&SAMPLE_DELIVER.to_lowercase()).unwrap());
        assert_eq!(a.hash, b.hash);

        let mut c = a.clone();
        c.address = "0812".to_string();
        c.rehash(Some("62"));
        let mut d = a;
        d.address = "+62812".to_string();
        d.rehash(Some("62"));
        assert_eq!(c.hash, d.hash);
    }
}
