//! GSM 03.38 default alphabet and septet packing
//!
//! Text is mapped to 7-bit septets through the default table, with the
//! characters of the extension table prefixed by the escape septet `0x1B`.
//! Septets are packed little-endian into octets, eight septets per seven
//! octets, optionally preceded by fill bits when a user data header has to
//! end on a septet boundary.

use crate::error::{CodecError, Result};

/// Escape septet selecting the extension table
pub const ESCAPE: u8 = 0x1B;

/// Carriage return septet, used as padding when seven spare bits remain
const CR: u8 = 0x0D;

/// GSM 03.38 default alphabet indexed by septet value
const DEFAULT_TABLE: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å', //
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É', //
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', //
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§', //
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', //
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à', //
];

/// Extension table: (septet following the escape, character)
const EXTENSION_TABLE: [(u8, char); 10] = [
    (0x0A, '\u{0c}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

/// Septet code for a single character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Septet {
    /// Character from the default table
    Basic(u8),
    /// Character from the extension table (escape + code)
    Extended(u8),
}

impl Septet {
    /// Number of septets this character occupies
    pub fn width(&self) -> usize {
        match self {
            Septet::Basic(_) => 1,
            Septet::Extended(_) => 2,
        }
    }
}

/// Look up the septet code for a character
pub fn lookup(c: char) -> Option<Septet> {
    // The escape code itself is not a printable character
    if c == '\u{1b}' {
        return None;
    }
    if let Some(pos) = DEFAULT_TABLE.iter().position(|&d| d == c) {
        return Some(Septet::Basic(pos as u8));
    }
    EXTENSION_TABLE
        .iter()
        .find(|(_, e)| *e == c)
        .map(|(code, _)| Septet::Extended(*code))
}

/// Check whether a character can be sent in the 7-bit alphabet
pub fn is_representable(c: char) -> bool {
    lookup(c).is_some()
}

/// Count septets needed for `text`, or `None` if a character is unmappable
pub fn septet_len(text: &str) -> Option<usize> {
    text.chars().map(|c| lookup(c).map(|s| s.width())).sum()
}

/// Map text to unpacked septet values
pub fn to_septets(text: &str) -> Result<Vec<u8>> {
    let mut septets = Vec::with_capacity(text.len());
    for c in text.chars() {
        match lookup(c).ok_or(CodecError::UnmappableCharacter(c))? {
            Septet::Basic(code) => septets.push(code),
            Septet::Extended(code) => {
                septets.push(ESCAPE);
                septets.push(code);
            }
        }
    }
    Ok(septets)
}

/// Map unpacked septet values back to text
///
/// A stray escape (at the end of the input or followed by a code missing from
/// the extension table) decodes to a space; the following septet is then read
/// from the default table.
pub fn from_septets(septets: &[u8]) -> String {
    let mut text = String::with_capacity(septets.len());
    let mut i = 0;
    while i < septets.len() {
        let code = septets[i] & 0x7F;
        if code == ESCAPE {
            let ext = septets.get(i + 1).and_then(|next| {
                EXTENSION_TABLE
                    .iter()
                    .find(|(c, _)| *c == (next & 0x7F))
                    .map(|(_, ch)| *ch)
            });
            match ext {
                Some(ch) => {
                    text.push(ch);
                    i += 2;
                }
                None => {
                    text.push(' ');
                    i += 1;
                }
            }
            continue;
        }
        text.push(DEFAULT_TABLE[code as usize]);
        i += 1;
    }
    text
}

/// Pack septets into octets, starting after `fill_bits` zero bits
pub fn pack(septets: &[u8], fill_bits: usize) -> Vec<u8> {
    let total_bits = fill_bits + septets.len() * 7;
    let mut octets = vec![0u8; total_bits.div_ceil(8)];
    for (i, &septet) in septets.iter().enumerate() {
        let bit = fill_bits + i * 7;
        let (byte, shift) = (bit / 8, bit % 8);
        let value = ((septet & 0x7F) as u16) << shift;
        octets[byte] |= value as u8;
        if shift > 1 {
            octets[byte + 1] |= (value >> 8) as u8;
        }
    }
    octets
}

/// Unpack `count` septets from octets, skipping `fill_bits` leading bits
pub fn unpack(octets: &[u8], count: usize, fill_bits: usize) -> Result<Vec<u8>> {
    let needed = (fill_bits + count * 7).div_ceil(8);
    if octets.len() < needed {
        return Err(CodecError::Truncated {
            field: "user data",
            needed,
            available: octets.len(),
        });
    }
    let mut septets = Vec::with_capacity(count);
    for i in 0..count {
        let bit = fill_bits + i * 7;
        let (byte, shift) = (bit / 8, bit % 8);
        let lo = octets[byte] as u16;
        let hi = octets.get(byte + 1).copied().unwrap_or(0) as u16;
        septets.push((((hi << 8) | lo) >> shift) as u8 & 0x7F);
    }
    Ok(septets)
}

/// Encode text to packed 7-bit octets, returning the octets and septet count
///
/// When the last octet would carry seven spare bits they are filled with a
/// carriage return instead of zeros, so a receiver that infers the length
/// from the octet count does not see a trailing `@`.
pub fn encode(text: &str) -> Result<(Vec<u8>, usize)> {
    let septets = to_septets(text)?;
    let count = septets.len();
    let mut octets = pack(&septets, 0);
    if count % 8 == 7 {
        if let Some(last) = octets.last_mut() {
            *last |= CR << 1;
        }
    }
    Ok((octets, count))
}

/// Decode packed 7-bit octets to text
///
/// With an explicit `count` the septets are taken as given. Without one the
/// count is inferred from the octet length; if that leaves a final septet
/// built entirely from padding bits, a trailing NUL (`@`) or carriage-return
/// pad is dropped. A NUL followed by the CR pad is kept as a real `@`.
pub fn decode(octets: &[u8], count: Option<usize>) -> Result<String> {
    match count {
        Some(count) => Ok(from_septets(&unpack(octets, count, 0)?)),
        None => {
            let inferred = octets.len() * 8 / 7;
            let mut septets = unpack(octets, inferred, 0)?;
            if inferred % 8 == 0 && matches!(septets.last(), Some(&0) | Some(&CR)) {
                septets.pop();
            }
            Ok(from_septets(&septets))
        }
    }
}
