//! Data coding scheme selection and message splitting

use serde::{Deserialize, Serialize};

use crate::alphabet;
use crate::error::{CodecError, Result};
use crate::udh;

/// Header length of an 8-bit reference concatenation UDH, UDHL included
pub const CONCAT_HEADER_LEN: usize = 6;

/// Alphabet used for the user data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodingScheme {
    /// GSM 03.38 default alphabet, packed septets
    Gsm7,
    /// 8-bit data, one octet per character
    Data8,
    /// UCS2 (UTF-16 big-endian code units)
    Ucs2,
}

impl CodingScheme {
    /// Pick the narrowest scheme able to carry `text`
    ///
    /// 7-bit if every character is in the default or extension table, else
    /// 8-bit if every code point is at most 255, else UCS2.
    pub fn detect(text: &str) -> Self {
        if text.chars().all(alphabet::is_representable) {
            CodingScheme::Gsm7
        } else if text.chars().all(|c| (c as u32) <= 0xFF) {
            CodingScheme::Data8
        } else {
            CodingScheme::Ucs2
        }
    }

    /// Scheme selected by a TP-DCS octet
    pub fn from_dcs(dcs: u8) -> Self {
        if dcs & 0xF0 == 0xF0 {
            // Data coding / message class group: bit 2 selects 8-bit data
            return if dcs & 0x04 != 0 {
                CodingScheme::Data8
            } else {
                CodingScheme::Gsm7
            };
        }
        match (dcs >> 2) & 0x03 {
            0x01 => CodingScheme::Data8,
            0x02 => CodingScheme::Ucs2,
            _ => CodingScheme::Gsm7,
        }
    }

    /// TP-DCS octet for this scheme; `flash` marks the message class 0
    pub fn dcs(&self, flash: bool) -> u8 {
        let alphabet = match self {
            CodingScheme::Gsm7 => 0x00,
            CodingScheme::Data8 => 0x04,
            CodingScheme::Ucs2 => 0x08,
        };
        if flash {
            0x10 | alphabet
        } else {
            alphabet
        }
    }

    /// Maximum encoded length of an unsplit message
    pub fn max_single(&self) -> usize {
        match self {
            CodingScheme::Gsm7 => 160,
            CodingScheme::Data8 => 140,
            CodingScheme::Ucs2 => 70,
        }
    }

    /// Maximum encoded length of one part of a concatenated message with
    /// an 8-bit reference
    pub fn max_part(&self) -> usize {
        self.max_with_header(CONCAT_HEADER_LEN)
    }

    /// Room left for text after a user data header of `header_len` octets
    pub fn max_with_header(&self, header_len: usize) -> usize {
        match self {
            CodingScheme::Gsm7 => 160usize.saturating_sub(udh::header_septets(header_len)),
            CodingScheme::Data8 => 140usize.saturating_sub(header_len),
            CodingScheme::Ucs2 => 140usize.saturating_sub(header_len) / 2,
        }
    }

    /// Encoded length of `text` in this scheme's units
    ///
    /// Septets for 7-bit (escapes count twice), octets for 8-bit, UTF-16
    /// code units for UCS2.
    pub fn encoded_len(&self, text: &str) -> Result<usize> {
        match self {
            CodingScheme::Gsm7 => alphabet::septet_len(text).ok_or_else(|| {
                let bad = text
                    .chars()
                    .find(|c| !alphabet::is_representable(*c))
                    .unwrap_or('\u{fffd}');
                CodecError::UnmappableCharacter(bad)
            }),
            CodingScheme::Data8 => match text.chars().find(|c| (*c as u32) > 0xFF) {
                Some(c) => Err(CodecError::OutOfRange(c)),
                None => Ok(text.chars().count()),
            },
            CodingScheme::Ucs2 => Ok(text.encode_utf16().count()),
        }
    }
}

impl std::fmt::Display for CodingScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodingScheme::Gsm7 => write!(f, "7bit"),
            CodingScheme::Data8 => write!(f, "8bit"),
            CodingScheme::Ucs2 => write!(f, "ucs2"),
        }
    }
}

/// Split `text` into parts that each fit one PDU
///
/// A message within the single-part limit is returned unsplit. Otherwise each
/// part is the longest prefix of the remainder whose encoded length fits the
/// concatenated limit. Candidates shrink a character at a time, so escape
/// sequences and surrogate pairs are never cut.
pub fn sms_split(text: &str, scheme: CodingScheme) -> Result<Vec<String>> {
    sms_split_with_header(text, scheme, CONCAT_HEADER_LEN)
}

/// Like [`sms_split`], for parts carrying a `header_len`-octet header
///
/// Use [`Concatenation::header_len`](crate::Concatenation::header_len) when
/// the reference needs the 16-bit element.
pub fn sms_split_with_header(
    text: &str,
    scheme: CodingScheme,
    header_len: usize,
) -> Result<Vec<String>> {
    if scheme.encoded_len(text)? <= scheme.max_single() {
        return Ok(vec![text.to_string()]);
    }

    let max = scheme.max_with_header(header_len);
    if max == 0 {
        return Err(CodecError::InvalidHeader(format!(
            "{} octet header leaves no room for text",
            header_len
        )));
    }
    let mut parts = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let boundaries: Vec<usize> = rest
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(rest.len()))
            .collect();
        let mut take = boundaries.len().min(max);
        let mut end = boundaries[take - 1];
        while take > 1 && scheme.encoded_len(&rest[..end])? > max {
            take -= 1;
            end = boundaries[take - 1];
        }
        parts.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_scheme() {
        assert_eq!(CodingScheme::detect("Hello [world] €"), CodingScheme::Gsm7);
        assert_eq!(CodingScheme::detect("naïve"), CodingScheme::Data8);
        assert_eq!(CodingScheme::detect("привет"), CodingScheme::Ucs2);
    }

    #[test]
    fn test_from_dcs() {
        assert_eq!(CodingScheme::from_dcs(0x00), CodingScheme::Gsm7);
        assert_eq!(CodingScheme::from_dcs(0x04), CodingScheme::Data8);
        assert_eq!(CodingScheme::from_dcs(0x08), CodingScheme::Ucs2);
        assert_eq!(CodingScheme::from_dcs(0x18), CodingScheme::Ucs2);
        assert_eq!(CodingScheme::from_dcs(0xF4), CodingScheme::Data8);
        assert_eq!(CodingScheme::from_dcs(0xF0), CodingScheme::Gsm7);
    }

    #[test]
    fn test_dcs_flash() {
        assert_eq!(CodingScheme::Gsm7.dcs(true), 0x10);
        assert_eq!(CodingScheme::Ucs2.dcs(false), 0x08);
    }

    #[test]
    fn test_single_part_passthrough() {
        let text = "a".repeat(160);
        assert_eq!(sms_split(&text, CodingScheme::Gsm7).unwrap(), vec![text]);
    }

    #[test]
    fn test_split_7bit_with_escapes() {
        let text = "[".repeat(100);
        let parts = sms_split(&text, CodingScheme::Gsm7).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), 76);
        assert_eq!(parts.concat(), text);
        for part in &parts {
            assert!(CodingScheme::Gsm7.encoded_len(part).unwrap() <= 153);
        }
    }

    #[test]
    fn test_split_ucs2() {
        let text = "你好".repeat(50);
        let parts = sms_split(&text, CodingScheme::Ucs2).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), 67);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_never_cuts_surrogates() {
        let text = "😀".repeat(40);
        let parts = sms_split(&text, CodingScheme::Ucs2).unwrap();
        assert_eq!(parts[0].chars().count(), 33);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_part_limits_follow_header() {
        assert_eq!(CodingScheme::Gsm7.max_part(), 153);
        assert_eq!(CodingScheme::Data8.max_part(), 134);
        assert_eq!(CodingScheme::Ucs2.max_part(), 67);
        assert_eq!(CodingScheme::Gsm7.max_with_header(7), 152);
        assert_eq!(CodingScheme::Data8.max_with_header(7), 133);
        assert_eq!(CodingScheme::Ucs2.max_with_header(7), 66);
    }

    #[test]
    fn test_split_for_16bit_reference() {
        let text = "a".repeat(200);
        let parts = sms_split_with_header(&text, CodingScheme::Gsm7, 7).unwrap();
        assert_eq!(parts[0].len(), 152);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_encoded_len_errors() {
        assert!(CodingScheme::Gsm7.encoded_len("中").is_err());
        assert_eq!(
            CodingScheme::Data8.encoded_len("ā").unwrap_err(),
            CodecError::OutOfRange('ā')
        );
    }
}
