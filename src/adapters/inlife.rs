use super::codec::{be_u16, xor_checksum};
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::{Reading, VendorComposition};

const NOTIFY: &str = "fff1";
const WRITE: &str = "fff2";

const FRAME_START: u8 = 0x02;
const FRAME_END: u8 = 0xAA;
const KIND_LIVE: u8 = 0xD8;
const KIND_FINAL: u8 = 0xDD;

/// Inlife fat scales (`000FatScale01`, `042FatScale01`).
#[derive(Debug, Default)]
pub struct InlifeAdapter {
    vendor: VendorComposition,
    done: bool,
}

impl InlifeAdapter {
    fn unlock_command() -> Vec<u8> {
        let mut frame = vec![FRAME_START, 0xD7, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        frame.push(xor_checksum(&frame[1..]));
        frame.push(FRAME_END);
        frame
    }
}

impl ScaleAdapter for InlifeAdapter {
    fn name(&self) -> &'static str {
        "inlife"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("fatscale")
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
        if data.len() < 4 || data[0] != FRAME_START || data.last() != Some(&FRAME_END) {
            return None;
        }
        let weight = f64::from(be_u16(data, 2)?) / 10.0;
        match data[1] {
            KIND_LIVE => Some(Reading::weight_only(weight)),
            KIND_FINAL if data.len() >= 14 => {
                let tenths = |offset| be_u16(data, offset).map(|raw| f64::from(raw) / 10.0);
                self.vendor = VendorComposition {
                    body_fat_percent: tenths(4),
                    water_percent: tenths(6),
                    muscle_mass: tenths(8),
                    bone_mass: tenths(10),
                    visceral_fat: Some(f64::from(data[12])),
                };
                self.done = true;
                Some(Reading::weight_only(weight))
            }
            _ => None,
        }
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.done && reading.has_valid_weight()
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.vendor
    }
}
