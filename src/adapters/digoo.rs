use super::codec::be_u16;
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::{Reading, VendorComposition};

const NOTIFY: &str = "fff1";

const STABLE: u8 = 0x01;
const ALL_FINAL: u8 = 0x02;

/// Digoo DG-SO38H ("Mengii").
#[derive(Debug, Default)]
pub struct DigooAdapter {
    vendor: VendorComposition,
    finished: bool,
}

impl ScaleAdapter for DigooAdapter {
    fn name(&self) -> &'static str {
        "digoo"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("mengii")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder().notify(NOTIFY).build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 6 {
            return None;
        }
        let control = data[5];
        let weight = f64::from(be_u16(data, 3)?) / 100.0;
        if control & ALL_FINAL != 0 && data.len() >= 16 {
            let tenths = |offset| be_u16(data, offset).map(|raw| f64::from(raw) / 10.0);
            self.vendor = VendorComposition {
                body_fat_percent: tenths(6),
                visceral_fat: Some(f64::from(data[10])),
                water_percent: tenths(11),
                muscle_mass: tenths(13),
                bone_mass: Some(f64::from(data[15]) / 10.0),
            };
            self.finished = true;
        } else if control & STABLE == 0 {
            self.finished = false;
        }
        Some(Reading::weight_only(weight))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.finished && reading.has_valid_weight()
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.vendor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{assert_close, assert_reading};

    #[test]
    fn final_bit_completes_with_composition() {
        let mut frame = [0u8; 16];
        frame[3..5].copy_from_slice(&7_500u16.to_be_bytes());
        frame[5] = STABLE | ALL_FINAL;
        frame[6..8].copy_from_slice(&215u16.to_be_bytes());
        frame[10] = 9;
        frame[11..13].copy_from_slice(&540u16.to_be_bytes());
        frame[13..15].copy_from_slice(&350u16.to_be_bytes());
        frame[15] = 30;

        let mut adapter = DigooAdapter::default();
        assert_reading(adapter.parse_notification(&frame), 75.0, 0.0);
        assert!(adapter.is_complete(&Reading::weight_only(75.0)));
        let vendor = adapter.vendor_composition();
        assert_close(vendor.body_fat_percent, 21.5);
        assert_close(vendor.muscle_mass, 35.0);
        assert_close(vendor.bone_mass, 3.0);
    }

    #[test]
    fn stable_weight_alone_is_not_final() {
        let mut frame = [0u8; 6];
        frame[3..5].copy_from_slice(&7_500u16.to_be_bytes());
        frame[5] = STABLE;
        let mut adapter = DigooAdapter::default();
        assert_reading(adapter.parse_notification(&frame), 75.0, 0.0);
        assert!(!adapter.is_complete(&Reading::weight_only(75.0)));
    }
}
