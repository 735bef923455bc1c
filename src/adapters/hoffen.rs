use super::codec::{le_u16, with_xor_checksum, xor_checksum};
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::Reading;

const NOTIFY: &str = "ffb2";
const WRITE: &str = "ffb1";

const FRAME_START: u8 = 0xFA;
const CMD_LIVE: u8 = 0x01;
const CMD_FINAL: u8 = 0x02;

/// Hoffen BS-8107.
#[derive(Debug, Default)]
pub struct HoffenAdapter {
    done: bool,
}

impl ScaleAdapter for HoffenAdapter {
    fn name(&self) -> &'static str {
        "hoffen"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("hoffen")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify(NOTIFY)
            .write(WRITE)
            .unlock_command(with_xor_checksum(
                vec![FRAME_START, 0x85, 0x03, 0x00, 0x00, 0x00],
                1,
            ))
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 6 || data[0] != FRAME_START {
            return None;
        }
        let (body, checksum) = data.split_at(data.len() - 1);
        if xor_checksum(&body[1..]) != checksum[0] {
            return None;
        }
        let weight = f64::from(le_u16(data, 3)?) / 10.0;
        match data[1] {
            CMD_LIVE => Some(Reading::weight_only(weight)),
            CMD_FINAL => {
                self.done = true;
                Some(Reading::new(weight, f64::from(le_u16(data, 5)?)))
            }
            _ => None,
        }
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.done && reading.has_valid_weight()
    }
}
