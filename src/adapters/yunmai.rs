use super::codec::{be_u16, be_u32};
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::{Reading, VendorComposition};

const NOTIFY: &str = "ffe4";
const WRITE: &str = "ffe9";

const FRAME_STABLE: u8 = 0x02;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
enum Variant {
    /// ISM and Mini models report resistance and body fat.
    #[default]
    Mini,
    /// ISSE and SE models report weight only.
    Se,
}

/// Yunmai ISM, ISSE and SE scales.
#[derive(Debug, Default)]
pub struct YunmaiAdapter {
    variant: Variant,
    stable: bool,
    vendor: VendorComposition,
}

impl ScaleAdapter for YunmaiAdapter {
    fn name(&self) -> &'static str {
        "yunmai"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        if !device.name_starts_with("yunmai") {
            return false;
        }
        self.variant = if device.name_contains("isse") || device.name_contains("-se") {
            Variant::Se
        } else {
            Variant::Mini
        };
        true
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify(NOTIFY)
            .write(WRITE)
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 17 || data[0] != 0x0D {
            return None;
        }
        self.stable = data[3] == FRAME_STABLE;
        let weight = f64::from(be_u32(data, 13)?) / 100.0;
        if !self.stable || self.variant == Variant::Se {
            return Some(Reading::weight_only(weight));
        }
        let resistance = be_u16(data, 17).unwrap_or(0);
        if let Some(fat) = be_u16(data, 19).filter(|fat| *fat > 0) {
            self.vendor.body_fat_percent = Some(f64::from(fat) / 100.0);
        }
        Some(Reading::new(weight, f64::from(resistance)))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.stable && reading.has_valid_weight()
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.vendor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{assert_close, assert_reading};

    fn frame(kind: u8, weight: u32, resistance: u16, fat: u16) -> Vec<u8> {
        let mut frame = vec![0x0D, 0x1E, 0x14, kind, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        frame.extend_from_slice(&weight.to_be_bytes());
        frame.extend_from_slice(&resistance.to_be_bytes());
        frame.extend_from_slice(&fat.to_be_bytes());
        frame
    }

    #[test]
    fn stable_mini_frame_reports_resistance_and_fat() {
        let mut adapter = YunmaiAdapter::default();
        assert!(adapter.matches(&DeviceInfo::new("YUNMAI-ISM2", ["ffe0"])));
        let reading = adapter.parse_notification(&frame(FRAME_STABLE, 6_850, 512, 2_150));
        assert_reading(reading, 68.5, 512.0);
        assert!(adapter.is_complete(&Reading::new(68.5, 512.0)));
        assert_close(adapter.vendor_composition().body_fat_percent, 21.5);
    }

    #[test]
    fn realtime_frame_is_not_complete() {
        let mut adapter = YunmaiAdapter::default();
        adapter.matches(&DeviceInfo::new("YUNMAI-ISM2", ["ffe0"]));
        assert_reading(adapter.parse_notification(&frame(0x01, 6_850, 0, 0)), 68.5, 0.0);
        assert!(!adapter.is_complete(&Reading::weight_only(68.5)));
    }

    #[test]
    fn se_variant_ignores_resistance() {
        let mut adapter = YunmaiAdapter::default();
        adapter.matches(&DeviceInfo::new("YUNMAI-ISSE", ["ffe0"]));
        let reading = adapter.parse_notification(&frame(FRAME_STABLE, 7_000, 512, 2_150));
        assert_reading(reading, 70.0, 0.0);
        assert!(adapter.vendor_composition().is_empty());
    }
}
