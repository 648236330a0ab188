//! Address fields (originator, destination, recipient, SMSC)
//!
//! Numbers travel as swapped-nibble BCD behind a length and a type-of-address
//! octet. Type `0x91` marks an international number (rendered with a leading
//! `+`), `0x81` a national or unknown one. Type-of-number 5 carries an
//! alphanumeric sender packed in the 7-bit alphabet.

use serde::{Deserialize, Serialize};

use crate::alphabet;
use crate::error::{CodecError, Result};

/// Type-of-address octet for international numbers
pub const TYPE_INTERNATIONAL: u8 = 0x91;

/// Type-of-address octet for national/unknown numbers
pub const TYPE_NATIONAL: u8 = 0x81;

/// Type-of-number value for alphanumeric addresses
const TON_ALPHANUMERIC: u8 = 5;

/// Type-of-number value for international numbers
const TON_INTERNATIONAL: u8 = 1;

/// A decoded address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Number as text (`+` prefixed when international)
    pub number: String,
    /// Raw type-of-address octet
    pub type_of_address: u8,
}

impl Address {
    /// Whether the number is an alphanumeric sender id
    pub fn is_alphanumeric(&self) -> bool {
        (self.type_of_address >> 4) & 0x07 == TON_ALPHANUMERIC
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.number)
    }
}

fn nibble_to_char(nibble: u8) -> Option<char> {
    match nibble {
        0..=9 => Some((b'0' + nibble) as char),
        0x0A => Some('*'),
        0x0B => Some('#'),
        0x0C => Some('a'),
        0x0D => Some('b'),
        0x0E => Some('c'),
        _ => None,
    }
}

fn char_to_nibble(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        '*' => Some(0x0A),
        '#' => Some(0x0B),
        'a' | 'A' => Some(0x0C),
        'b' | 'B' => Some(0x0D),
        'c' | 'C' => Some(0x0E),
        _ => None,
    }
}

/// Decode swapped-nibble BCD digits, stopping at the `F` filler
pub fn decode_bcd(octets: &[u8]) -> String {
    let mut digits = String::with_capacity(octets.len() * 2);
    for &octet in octets {
        for nibble in [octet & 0x0F, octet >> 4] {
            match nibble_to_char(nibble) {
                Some(c) => digits.push(c),
                None => return digits,
            }
        }
    }
    digits
}

/// Encode digits as swapped-nibble BCD, padding an odd count with `F`
pub fn encode_bcd(digits: &str) -> Result<Vec<u8>> {
    let nibbles = digits
        .chars()
        .map(|c| char_to_nibble(c).ok_or_else(|| CodecError::InvalidAddress(digits.to_string())))
        .collect::<Result<Vec<u8>>>()?;
    Ok(nibbles
        .chunks(2)
        .map(|pair| pair[0] | (pair.get(1).copied().unwrap_or(0x0F) << 4))
        .collect())
}

/// Encode an originator/destination address: digit count, type, BCD digits
pub fn encode_number(number: &str) -> Result<Vec<u8>> {
    let (digits, type_of_address) = match number.strip_prefix('+') {
        Some(rest) => (rest, TYPE_INTERNATIONAL),
        None => (number, TYPE_NATIONAL),
    };
    if digits.is_empty() || digits.len() > 20 {
        return Err(CodecError::InvalidAddress(number.to_string()));
    }
    let mut out = Vec::with_capacity(2 + digits.len().div_ceil(2));
    out.push(digits.len() as u8);
    out.push(type_of_address);
    out.extend(encode_bcd(digits)?);
    Ok(out)
}

/// Decode an originator/destination address whose length is in semi-octets
///
/// Returns the address and the number of octets consumed.
pub fn decode_number(pdu: &[u8]) -> Result<(Address, usize)> {
    if pdu.len() < 2 {
        return Err(CodecError::Truncated {
            field: "address header",
            needed: 2,
            available: pdu.len(),
        });
    }
    let semi_octets = pdu[0] as usize;
    let type_of_address = pdu[1];
    let octets = semi_octets.div_ceil(2);
    let body = pdu.get(2..2 + octets).ok_or(CodecError::Truncated {
        field: "address",
        needed: octets,
        available: pdu.len() - 2,
    })?;

    let ton = (type_of_address >> 4) & 0x07;
    let number = if ton == TON_ALPHANUMERIC {
        alphabet::decode(body, Some(semi_octets * 4 / 7))?
    } else {
        let digits = decode_bcd(body);
        if ton == TON_INTERNATIONAL {
            format!("+{}", digits)
        } else {
            digits
        }
    };

    Ok((
        Address {
            number,
            type_of_address,
        },
        2 + octets,
    ))
}

/// Decode the SMSC prefix whose length is in octets (type octet included)
///
/// Returns `None` for an empty prefix and the number of octets consumed.
pub fn decode_smsc(pdu: &[u8]) -> Result<(Option<Address>, usize)> {
    let len = *pdu.first().ok_or(CodecError::Truncated {
        field: "smsc length",
        needed: 1,
        available: 0,
    })? as usize;
    if len == 0 {
        return Ok((None, 1));
    }
    let field = pdu.get(1..1 + len).ok_or(CodecError::Truncated {
        field: "smsc",
        needed: len,
        available: pdu.len() - 1,
    })?;
    let type_of_address = field[0];
    let digits = decode_bcd(&field[1..]);
    let number = if (type_of_address >> 4) & 0x07 == TON_INTERNATIONAL {
        format!("+{}", digits)
    } else {
        digits
    };
    Ok((
        Some(Address {
            number,
            type_of_address,
        }),
        1 + len,
    ))
}

/// Normalize a number for comparison and hashing
///
/// A national number with a leading trunk `0` is rewritten in international
/// form when the country code is known; everything else passes through with
/// separators removed.
pub fn normalize_number(number: &str, country_code: Option<&str>) -> String {
    let compact: String = number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    match (country_code, compact.strip_prefix('0')) {
        (Some(cc), Some(rest)) if !compact.starts_with("00") && !cc.is_empty() => {
            format!("+{}{}", cc.trim_start_matches('+'), rest)
        }
        (_, _) if compact.starts_with("00") => format!("+{}", &compact[2..]),
        _ => compact,
    }
}
