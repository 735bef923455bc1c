use super::codec::{be_u16, sum_checksum};
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::Reading;

const NOTIFY: &str = "2a10";
const WRITE: &str = "2a11";
const HEADER: [u8; 2] = [0x55, 0xAA];
const FRAME_WEIGHT: u8 = 0x14;

/// Renpho ES-WBE28 and other Renpho models that do not speak the QN protocol.
///
/// Matches the same names as [`super::QnAdapter`], so it must reject any
/// device advertising the QN `ffe0` service.
#[derive(Debug, Default)]
pub struct RenphoAdapter {
    stable: bool,
}

impl RenphoAdapter {
    fn unlock_command() -> Vec<u8> {
        let mut frame = vec![0x55, 0xAA, 0x90, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00];
        frame.push(sum_checksum(&frame));
        frame
    }
}

impl ScaleAdapter for RenphoAdapter {
    fn name(&self) -> &'static str {
        "renpho"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        (device.name_contains("renpho") || device.name_contains("es-wbe28"))
            && !device.advertises("ffe0")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify(NOTIFY)
            .write(WRITE)
            .unlock_command(Self::unlock_command())
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 11 || data[..2] != HEADER || data[2] != FRAME_WEIGHT {
            return None;
        }
        let (body, checksum) = data.split_at(10);
        if sum_checksum(body) != checksum[0] {
            return None;
        }
        self.stable = data[5] & 0x01 != 0;
        let weight = f64::from(be_u16(data, 6)?) / 100.0;
        let impedance = f64::from(be_u16(data, 8)?);
        Some(Reading::new(weight, impedance))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.stable && reading.has_valid_weight()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::adapters::testing::assert_reading;

    fn frame(stable: bool, weight: u16, impedance: u16) -> Vec<u8> {
        let mut frame = vec![0x55, 0xAA, FRAME_WEIGHT, 0x00, 0x07, u8::from(stable)];
        frame.extend_from_slice(&weight.to_be_bytes());
        frame.extend_from_slice(&impedance.to_be_bytes());
        frame.push(sum_checksum(&frame));
        frame
    }

    #[test]
    fn stable_frame_completes_measurement() {
        let mut adapter = RenphoAdapter::default();
        let reading = adapter.parse_notification(&frame(true, 7_250, 480));
        assert_reading(reading, 72.5, 480.0);
        assert!(adapter.is_complete(&Reading::new(72.5, 480.0)));
    }

    #[test]
    fn live_frame_is_not_complete() {
        let mut adapter = RenphoAdapter::default();
        assert_reading(adapter.parse_notification(&frame(false, 7_000, 0)), 70.0, 0.0);
        assert!(!adapter.is_complete(&Reading::weight_only(70.0)));
    }

    #[test]
    fn bad_checksum_is_ignored() {
        let mut adapter = RenphoAdapter::default();
        let mut corrupted = frame(true, 7_250, 480);
        corrupted[10] ^= 0xFF;
        assert_eq!(None, adapter.parse_notification(&corrupted));
    }

    #[test]
    fn rejects_devices_advertising_qn_service() {
        let mut adapter = RenphoAdapter::default();
        assert!(!adapter.matches(&DeviceInfo::new("Renpho", ["ffe0"])));
        assert!(adapter.matches(&DeviceInfo::new("Renpho", ["181d"])));
    }
}
