//! Service-centre timestamps and validity periods

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Octet length of a TP-SCTS / TP-DT field
pub const TIMESTAMP_OCTETS: usize = 7;

/// Timestamp as carried in a PDU: local fields plus quarter-hour zone offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmsTimestamp {
    /// Two-digit year (`00`-`99`, read as 20xx)
    pub year: u8,
    /// Month 1-12
    pub month: u8,
    /// Day 1-31
    pub day: u8,
    /// Hour 0-23
    pub hour: u8,
    /// Minute 0-59
    pub minute: u8,
    /// Second 0-59
    pub second: u8,
    /// Offset from UTC in quarter hours (signed)
    pub tz_quarters: i8,
}

fn swapped_bcd(octet: u8) -> u8 {
    (octet & 0x0F) * 10 + (octet >> 4)
}

fn to_swapped_bcd(value: u8) -> u8 {
    ((value % 10) << 4) | (value / 10 % 10)
}

impl SmsTimestamp {
    /// Decode the seven semi-octet fields
    pub fn decode(octets: &[u8]) -> Result<Self> {
        if octets.len() != TIMESTAMP_OCTETS {
            return Err(CodecError::TimestampLength(octets.len()));
        }
        let tz = octets[6];
        // Sign bit is bit 3 of the raw octet (high nibble after the swap)
        let quarters = ((tz & 0x07) * 10 + (tz >> 4)) as i8;
        Ok(Self {
            year: swapped_bcd(octets[0]),
            month: swapped_bcd(octets[1]),
            day: swapped_bcd(octets[2]),
            hour: swapped_bcd(octets[3]),
            minute: swapped_bcd(octets[4]),
            second: swapped_bcd(octets[5]),
            tz_quarters: if tz & 0x08 != 0 { -quarters } else { quarters },
        })
    }

    /// Encode to seven semi-octet fields
    pub fn encode(&self) -> [u8; TIMESTAMP_OCTETS] {
        let mut tz = to_swapped_bcd(self.tz_quarters.unsigned_abs());
        if self.tz_quarters < 0 {
            tz |= 0x08;
        }
        [
            to_swapped_bcd(self.year),
            to_swapped_bcd(self.month),
            to_swapped_bcd(self.day),
            to_swapped_bcd(self.hour),
            to_swapped_bcd(self.minute),
            to_swapped_bcd(self.second),
            tz,
        ]
    }

    /// Convert to a zoned date-time, if the fields form a valid date
    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.tz_quarters as i32 * 15 * 60)?;
        NaiveDate::from_ymd_opt(2000 + self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32)?
            .and_local_timezone(offset)
            .single()
    }
}

impl std::fmt::Display for SmsTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.tz_quarters < 0 { '-' } else { '+' };
        let minutes = self.tz_quarters.unsigned_abs() as u32 * 15;
        write!(
            f,
            "20{:02}-{:02}-{:02}T{:02}:{:02}:{:02}{}{:02}:{:02}",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            sign,
            minutes / 60,
            minutes % 60
        )
    }
}

/// Map a validity period in minutes to the relative TP-VP octet
///
/// Bands: 0-143 five-minute steps up to 12 h, 144-167 half hours up to 24 h,
/// 168-196 days up to 30 days, 197-255 weeks up to 63 weeks. Values round up
/// so the granted period never falls short of the request.
pub fn validity_index(minutes: u32) -> u8 {
    let index = if minutes <= 720 {
        minutes.div_ceil(5).saturating_sub(1)
    } else if minutes <= 1440 {
        143 + (minutes - 720).div_ceil(30)
    } else if minutes <= 30 * 1440 {
        166 + minutes.div_ceil(1440)
    } else {
        192 + minutes.div_ceil(10080)
    };
    index.min(255) as u8
}

/// Map a relative TP-VP octet back to minutes
pub fn validity_minutes(index: u8) -> u32 {
    let v = index as u32;
    match v {
        0..=143 => (v + 1) * 5,
        144..=167 => 720 + (v - 143) * 30,
        168..=196 => (v - 166) * 1440,
        _ => (v - 192) * 10080,
    }
}

/// Validity period field of a submit PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    /// No validity field present
    None,
    /// Relative validity (TP-VPF = 10), raw octet
    Relative(u8),
    /// Enhanced format (TP-VPF = 01), seven raw octets
    Enhanced([u8; 7]),
    /// Absolute timestamp (TP-VPF = 11)
    Absolute(SmsTimestamp),
}

impl Validity {
    /// Relative validity covering at least `minutes`
    pub fn from_minutes(minutes: u32) -> Self {
        Validity::Relative(validity_index(minutes))
    }

    /// Validity as minutes, when relative
    pub fn minutes(&self) -> Option<u32> {
        match self {
            Validity::Relative(index) => Some(validity_minutes(*index)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_timestamp() {
        let ts = SmsTimestamp::decode(&[0x11, 0x50, 0x71, 0x01, 0x50, 0x64, 0x82]).unwrap();
        assert_eq!(ts.year, 11);
        assert_eq!(ts.month, 5);
        assert_eq!(ts.day, 17);
        assert_eq!(ts.hour, 10);
        assert_eq!(ts.minute, 5);
        assert_eq!(ts.second, 46);
        assert_eq!(ts.tz_quarters, 28);
        assert_eq!(ts.to_string(), "2011-05-17T10:05:46+07:00");
    }

    #[test]
    fn test_negative_timezone() {
        let ts = SmsTimestamp {
            year: 24,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 58,
            tz_quarters: -20,
        };
        let encoded = ts.encode();
        assert_eq!(encoded[6], 0x0A);
        assert_eq!(SmsTimestamp::decode(&encoded).unwrap(), ts);
        assert_eq!(ts.to_datetime().unwrap().offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_wrong_timestamp_length() {
        assert_eq!(
            SmsTimestamp::decode(&[0x11, 0x50]).unwrap_err(),
            CodecError::TimestampLength(2)
        );
    }

    #[test]
    fn test_validity_bands() {
        assert_eq!(validity_index(5), 0);
        assert_eq!(validity_index(720), 143);
        assert_eq!(validity_index(750), 144);
        assert_eq!(validity_index(1440), 167);
        assert_eq!(validity_index(2880), 168);
        assert_eq!(validity_index(10080), 173);
        assert_eq!(validity_index(50400), 197);
        assert_eq!(validity_index(u32::MAX / 2), 255);
    }

    #[test]
    fn test_validity_monotonic_across_bands() {
        let samples = [0, 715, 720, 1440, 2880, 10080, 50400];
        let indices: Vec<u8> = samples.iter().map(|m| validity_index(*m)).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]), "{:?}", indices);
    }

    #[test]
    fn test_validity_minutes_covers_request() {
        for minutes in [1, 60, 719, 721, 1439, 4000, 40000, 100000] {
            assert!(validity_minutes(validity_index(minutes)) >= minutes);
        }
    }
}
