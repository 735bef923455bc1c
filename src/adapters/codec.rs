//! Byte-level helpers shared by the vendor decoders.

use crate::measurement::{Gender, UserProfile};

/// Reads a big-endian `u16` at `offset`.
pub(crate) fn be_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a little-endian `u16` at `offset`.
pub(crate) fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Reads a big-endian `u32` at `offset`.
pub(crate) fn be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a little-endian `u32` at `offset`.
pub(crate) fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decodes a 24-bit little-endian mantissa followed by a signed 8-bit
/// base-10 exponent: `value = mantissa * 10^exponent`.
pub(crate) fn base10_float(data: &[u8], offset: usize) -> Option<f64> {
    let bytes = data.get(offset..offset + 4)?;
    let mantissa = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);
    let exponent = i8::from_le_bytes([bytes[3]]);
    Some(f64::from(mantissa) * 10f64.powi(i32::from(exponent)))
}

/// XOR of every byte in `bytes`.
pub(crate) fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Wrapping byte sum of every byte in `bytes`.
pub(crate) fn sum_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// Appends the XOR checksum of `frame[start..]` to `frame`.
pub(crate) fn with_xor_checksum(mut frame: Vec<u8>, start: usize) -> Vec<u8> {
    let checksum = xor_checksum(frame.get(start..).unwrap_or_default());
    frame.push(checksum);
    frame
}

/// Returns whether a kilogram value falls inside the range a person can weigh.
pub(crate) fn plausible_weight(kg: f64) -> bool {
    kg.is_finite() && (2.0..=300.0).contains(&kg)
}

/// Profile fields as single bytes: `(gender, age, height_cm)`, gender 1 = male.
pub(crate) fn profile_bytes(profile: &UserProfile) -> (u8, u8, u8) {
    let gender = match profile.gender() {
        Gender::Male => 0x01,
        Gender::Female => 0x00,
    };
    let age = u8::try_from(profile.age_years()).unwrap_or(u8::MAX);
    let height = profile.height_cm().round().clamp(0.0, 255.0) as u8;
    (gender, age, height)
}

/// Seconds since 2000-01-01T00:00:00Z, the epoch most scale clocks count from.
pub(crate) fn seconds_since_2000(now: time::OffsetDateTime) -> u32 {
    const EPOCH_2000: i64 = 946_684_800;
    u32::try_from(now.unix_timestamp() - EPOCH_2000).unwrap_or(0)
}

/// Flags and field cursor of a Bluetooth SIG measurement characteristic.
///
/// The flags word selects which optional little-endian fields follow; callers
/// walk them in order with [`SigFields::take_u16`].
#[derive(Debug)]
pub(crate) struct SigFields<'a> {
    flags: u16,
    data: &'a [u8],
    cursor: usize,
}

impl<'a> SigFields<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Option<Self> {
        let flags = le_u16(data, 0)?;
        Some(Self {
            flags,
            data,
            cursor: 2,
        })
    }

    pub(crate) fn flag(&self, bit: u8) -> bool {
        self.flags & (1 << bit) != 0
    }

    pub(crate) fn take_u16(&mut self) -> Option<u16> {
        let value = le_u16(self.data, self.cursor)?;
        self.cursor += 2;
        Some(value)
    }

    pub(crate) fn skip(&mut self, len: usize) {
        self.cursor += len;
    }

    pub(crate) fn take_u16_if(&mut self, bit: u8) -> Option<u16> {
        if self.flag(bit) {
            self.take_u16()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn integer_readers_refuse_short_input() {
        assert_eq!(None, be_u16(&[0x01], 0));
        assert_eq!(None, le_u32(&[0x01, 0x02, 0x03], 0));
        assert_eq!(Some(0x1F40), be_u16(&[0x00, 0x1F, 0x40], 1));
        assert_eq!(Some(0x401F), le_u16(&[0x00, 0x1F, 0x40], 1));
    }

    #[rstest]
    #[case([0x00, 0x1F, 0x00, 0xFE], 79.36)]
    #[case([0x01, 0x00, 0x00, 0x02], 100.0)]
    #[case([0xE8, 0x03, 0x00, 0x00], 1000.0)]
    fn base10_float_applies_signed_exponent(#[case] bytes: [u8; 4], #[case] expected: f64) {
        let value = base10_float(&bytes, 0).expect("four bytes should decode");
        assert!((value - expected).abs() < 1e-9, "{value} != {expected}");
    }

    #[test]
    fn xor_checksum_covers_requested_range() {
        let frame = with_xor_checksum(vec![0xAA, 0x01, 0x02, 0x04], 1);
        assert_eq!(vec![0xAA, 0x01, 0x02, 0x04, 0x07], frame);
    }

    #[test]
    fn sig_fields_walk_present_fields_in_order() {
        // flags 0x0006: bits 1 and 2 set.
        let data = [0x06, 0x00, 0x10, 0x00, 0x20, 0x00];
        let mut fields = SigFields::new(&data).expect("flags should decode");
        assert_eq!(None, fields.take_u16_if(0));
        assert_eq!(Some(0x0010), fields.take_u16_if(1));
        assert_eq!(Some(0x0020), fields.take_u16_if(2));
        assert_eq!(None, fields.take_u16_if(3));
    }

    #[test]
    fn seconds_since_2000_counts_from_millennium() {
        let moment = time::macros::datetime!(2000-01-02 00:00 UTC);
        assert_eq!(86_400, seconds_since_2000(moment));
    }
}
