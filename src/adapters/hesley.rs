use super::codec::be_u16;
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::{Reading, VendorComposition};

const NOTIFY: &str = "fff4";
const WRITE: &str = "fff1";

/// Hesley ("YOLANDA") scales.
#[derive(Debug, Default)]
pub struct HesleyAdapter {
    vendor: VendorComposition,
}

impl ScaleAdapter for HesleyAdapter {
    fn name(&self) -> &'static str {
        "hesley"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("yolanda")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify(NOTIFY)
            .write(WRITE)
            .unlock_command(vec![0xA5, 0x01, 0x2C, 0xAB, 0x50, 0x5A, 0x29])
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 14 {
            return None;
        }
        let weight = f64::from(be_u16(data, 2)?) / 100.0;
        let tenths = |offset| be_u16(data, offset).map(|raw| f64::from(raw) / 10.0);
        self.vendor = VendorComposition {
            body_fat_percent: tenths(4),
            water_percent: tenths(8),
            muscle_mass: tenths(10),
            bone_mass: tenths(12),
            visceral_fat: None,
        };
        Some(Reading::weight_only(weight))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        reading.has_valid_weight() && self.vendor.body_fat_percent.is_some_and(|fat| fat > 0.0)
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.vendor
    }
}
