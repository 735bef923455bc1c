use super::codec::be_u16;
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::{Reading, VendorComposition};

const NOTIFY: &str = "ffb2";
const WRITE: &str = "ffb1";

const FRAME_WEIGHT: u8 = 0xAC;
const FRAME_COMPOSITION_A: u8 = 0x01;
const FRAME_COMPOSITION_B: u8 = 0x02;

const SEEN_WEIGHT: u8 = 0b001;
const SEEN_A: u8 = 0b010;
const SEEN_B: u8 = 0b100;
const SEEN_ALL: u8 = SEEN_WEIGHT | SEEN_A | SEEN_B;

/// MGB ("SWAN", "Icomon") scales: one weight frame and two composition frames.
#[derive(Debug, Default)]
pub struct MgbAdapter {
    seen: u8,
    weight: f64,
    vendor: VendorComposition,
}

impl ScaleAdapter for MgbAdapter {
    fn name(&self) -> &'static str {
        "mgb"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_starts_with("swan") || device.name_contains("icomon")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify(NOTIFY)
            .write(WRITE)
            .unlock_command(vec![0xAC, 0x02, 0xF7, 0x00, 0x00, 0x00, 0xCC, 0xC3])
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 6 {
            return None;
        }
        let tenths = |offset| be_u16(data, offset).map(|raw| f64::from(raw) / 10.0);
        match data[0] {
            FRAME_WEIGHT if data.len() >= 10 => {
                self.weight = tenths(8)?;
                if data[2] == 0x00 {
                    self.seen |= SEEN_WEIGHT;
                }
            }
            FRAME_COMPOSITION_A => {
                self.vendor.body_fat_percent = tenths(2);
                self.vendor.water_percent = tenths(4);
                self.seen |= SEEN_A;
            }
            FRAME_COMPOSITION_B => {
                self.vendor.muscle_mass = tenths(2);
                self.vendor.bone_mass = tenths(4);
                self.seen |= SEEN_B;
            }
            _ => return None,
        }
        Some(Reading::weight_only(self.weight))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.seen == SEEN_ALL && reading.has_valid_weight()
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.vendor
    }
}
