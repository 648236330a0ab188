//! User data header: concatenated short message information elements

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// IE id for concatenation with an 8-bit reference
const IE_CONCAT_8BIT: u8 = 0x00;

/// IE id for concatenation with a 16-bit reference
const IE_CONCAT_16BIT: u8 = 0x08;

/// Concatenation information for one part of a multipart message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Concatenation {
    /// Reference shared by all parts
    pub reference: u16,
    /// Total number of parts
    pub total: u8,
    /// 1-based index of this part
    pub index: u8,
}

impl Concatenation {
    /// Whether the reference needs the 16-bit IE
    pub fn is_16bit(&self) -> bool {
        self.reference > 0xFF
    }

    /// Encode the full header: UDHL octet followed by the IE
    pub fn encode_header(&self) -> Vec<u8> {
        if self.is_16bit() {
            let [hi, lo] = self.reference.to_be_bytes();
            vec![0x06, IE_CONCAT_16BIT, 0x04, hi, lo, self.total, self.index]
        } else {
            vec![
                0x05,
                IE_CONCAT_8BIT,
                0x03,
                self.reference as u8,
                self.total,
                self.index,
            ]
        }
    }

    /// Header length in octets, including the UDHL octet
    pub fn header_len(&self) -> usize {
        if self.is_16bit() {
            7
        } else {
            6
        }
    }
}

/// Parsed user data header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDataHeader {
    /// Concatenation IE, if present
    pub concatenation: Option<Concatenation>,
    /// Total header length in octets including the UDHL octet
    pub length: usize,
}

impl UserDataHeader {
    /// Parse the header at the start of the user data
    pub fn decode(user_data: &[u8]) -> Result<Self> {
        let udhl = *user_data.first().ok_or(CodecError::Truncated {
            field: "udh length",
            needed: 1,
            available: 0,
        })? as usize;
        let body = user_data.get(1..1 + udhl).ok_or(CodecError::Truncated {
            field: "udh",
            needed: udhl,
            available: user_data.len() - 1,
        })?;

        let mut concatenation = None;
        let mut pos = 0;
        while pos + 2 <= body.len() {
            let (id, len) = (body[pos], body[pos + 1] as usize);
            let data = body
                .get(pos + 2..pos + 2 + len)
                .ok_or_else(|| CodecError::InvalidHeader(format!("IE 0x{:02X} overruns header", id)))?;
            match (id, len) {
                (IE_CONCAT_8BIT, 3) => {
                    concatenation = Some(Concatenation {
                        reference: data[0] as u16,
                        total: data[1],
                        index: data[2],
                    });
                }
                (IE_CONCAT_16BIT, 4) => {
                    concatenation = Some(Concatenation {
                        reference: u16::from_be_bytes([data[0], data[1]]),
                        total: data[2],
                        index: data[3],
                    });
                }
                _ => {}
            }
            pos += 2 + len;
        }

        if let Some(c) = concatenation {
            if c.total == 0 || c.index == 0 || c.index > c.total {
                return Err(CodecError::InvalidHeader(format!(
                    "part {} of {}",
                    c.index, c.total
                )));
            }
        }

        Ok(Self {
            concatenation,
            length: 1 + udhl,
        })
    }
}

/// Septets occupied by a header of `header_len` octets in 7-bit mode
pub fn header_septets(header_len: usize) -> usize {
    (header_len * 8).div_ceil(7)
}

/// Fill bits needed after a header so text starts on a septet boundary
pub fn fill_bits(header_len: usize) -> usize {
    header_septets(header_len) * 7 - header_len * 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_8bit_reference() {
        let c = Concatenation {
            reference: 0x42,
            total: 3,
            index: 2,
        };
        assert_eq!(c.encode_header(), vec![0x05, 0x00, 0x03, 0x42, 0x03, 0x02]);
        assert_eq!(c.header_len(), 6);
    }

    #[test]
    fn test_encode_16bit_reference() {
        let c = Concatenation {
            reference: 0x1234,
            total: 2,
            index: 1,
        };
        assert_eq!(
            c.encode_header(),
            vec![0x06, 0x08, 0x04, 0x12, 0x34, 0x02, 0x01]
        );
    }

    #[test]
    fn test_decode_header() {
        let udh = UserDataHeader::decode(&[0x05, 0x00, 0x03, 0x42, 0x03, 0x02, 0xAA]).unwrap();
        assert_eq!(udh.length, 6);
        assert_eq!(
            udh.concatenation,
            Some(Concatenation {
                reference: 0x42,
                total: 3,
                index: 2
            })
        );
    }

    #[test]
    fn test_decode_skips_unknown_ie() {
        let udh = UserDataHeader::decode(&[0x03, 0x24, 0x01, 0x01]).unwrap();
        assert!(udh.concatenation.is_none());
        assert_eq!(udh.length, 4);
    }

    #[test]
    fn test_decode_rejects_bad_index() {
        assert!(UserDataHeader::decode(&[0x05, 0x00, 0x03, 0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_fill_bits() {
        assert_eq!(header_septets(6), 7);
        assert_eq!(fill_bits(6), 1);
        assert_eq!(header_septets(7), 8);
        assert_eq!(fill_bits(7), 0);
    }
}
