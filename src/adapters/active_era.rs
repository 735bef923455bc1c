use super::codec::{be_u16, sum_checksum};
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::Reading;

const NOTIFY: &str = "ffb2";
const WRITE: &str = "ffb1";

const HEADER: [u8; 2] = [0xAC, 0x02];
const KIND_LIVE: u8 = 0xCE;
const KIND_FINAL: u8 = 0xCB;

/// ActiveEra BS-06: 24-bit gram weights.
#[derive(Debug, Default)]
pub struct ActiveEraAdapter {
    done: bool,
}

impl ActiveEraAdapter {
    fn unlock_command() -> Vec<u8> {
        let mut frame = vec![0xAC, 0x02, 0xF7, 0x00, 0x00, 0x00, 0xCC];
        frame.push(sum_checksum(&frame[2..]));
        frame
    }

    fn grams(data: &[u8]) -> Option<f64> {
        let bytes = data.get(3..6)?;
        let raw = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
        Some(f64::from(raw) / 1000.0)
    }
}

impl ScaleAdapter for ActiveEraAdapter {
    fn name(&self) -> &'static str {
        "active-era"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("ae bs-06")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify(NOTIFY)
            .write(WRITE)
            .unlock_command(Self::unlock_command())
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 9 || data[..2] != HEADER {
            return None;
        }
        let (body, checksum) = data.split_at(data.len() - 1);
        if sum_checksum(&body[2..]) != checksum[0] {
            return None;
        }
        let weight = Self::grams(data)?;
        match data[2] {
            KIND_LIVE => Some(Reading::weight_only(weight)),
            KIND_FINAL => {
                self.done = true;
                Some(Reading::new(weight, f64::from(be_u16(data, 6)?)))
            }
            _ => None,
        }
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.done && reading.has_valid_weight()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::adapters::testing::assert_reading;

    fn frame(kind: u8, grams: u32, impedance: u16) -> Vec<u8> {
        let grams = grams.to_be_bytes();
        let mut frame = vec![0xAC, 0x02, kind, grams[1], grams[2], grams[3]];
        frame.extend_from_slice(&impedance.to_be_bytes());
        frame.push(sum_checksum(&frame[2..]));
        frame
    }

    #[test]
    fn final_frame_decodes_24_bit_weight() {
        let mut adapter = ActiveEraAdapter::default();
        assert_reading(adapter.parse_notification(&frame(KIND_LIVE, 74_950, 0)), 74.95, 0.0);
        assert!(!adapter.is_complete(&Reading::weight_only(74.95)));

        let reading = adapter.parse_notification(&frame(KIND_FINAL, 75_050, 505));
        assert_reading(reading, 75.05, 505.0);
        assert!(adapter.is_complete(&Reading::new(75.05, 505.0)));
    }

    #[test]
    fn corrupted_checksum_is_ignored() {
        let mut corrupted = frame(KIND_FINAL, 75_050, 505);
        corrupted[4] ^= 0x01;
        assert_eq!(None, ActiveEraAdapter::default().parse_notification(&corrupted));
    }
}
