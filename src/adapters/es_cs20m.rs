use super::codec::{be_u16, sum_checksum};
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::Reading;

const NOTIFY: &str = "2a10";
const WRITE: &str = "2a11";

const FRAME_WEIGHT: u8 = 0x14;
const FRAME_IMPEDANCE: u8 = 0x15;
const FRAME_END: u8 = 0x11;

/// Renpho ES-CS20M: weight and impedance arrive in separate frames, and an
/// end-of-measurement frame closes the session when no impedance is taken.
#[derive(Debug, Default)]
pub struct EsCs20mAdapter {
    weight: f64,
    impedance: f64,
    stable: bool,
    finished: bool,
}

impl EsCs20mAdapter {
    fn start_command() -> Vec<u8> {
        let mut frame = vec![0x55, 0xAA, 0x90, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00];
        frame.push(sum_checksum(&frame));
        frame
    }
}

impl ScaleAdapter for EsCs20mAdapter {
    fn name(&self) -> &'static str {
        "es-cs20m"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("es-cs20m") || device.advertises("1a10")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify(NOTIFY)
            .write(WRITE)
            .unlock_command(Self::start_command())
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 6 || data[..2] != [0x55, 0xAA] {
            return None;
        }
        match data[2] {
            FRAME_WEIGHT => {
                self.stable = data[5] & 0x01 != 0;
                self.weight = f64::from(be_u16(data, 8)?) / 100.0;
            }
            FRAME_IMPEDANCE => {
                let impedance = be_u16(data, 4)?;
                if impedance > 0 {
                    self.impedance = f64::from(impedance);
                }
            }
            FRAME_END => {
                self.finished = data[5] == 0x00;
            }
            _ => return None,
        }
        Some(Reading::new(self.weight, self.impedance))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.stable && reading.has_valid_weight() && (reading.has_impedance() || self.finished)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::adapters::testing::assert_reading;

    const STABLE_WEIGHT: [u8; 10] = [0x55, 0xAA, 0x14, 0x00, 0x07, 0x01, 0x00, 0x00, 0x1C, 0x84];
    const IMPEDANCE: [u8; 6] = [0x55, 0xAA, 0x15, 0x00, 0x01, 0xF4];

    #[test]
    fn accumulates_weight_then_impedance() {
        let mut adapter = EsCs20mAdapter::default();
        let weight = adapter.parse_notification(&STABLE_WEIGHT);
        assert_reading(weight, 73.0, 0.0);
        assert!(!adapter.is_complete(&Reading::weight_only(73.0)));

        let reading = adapter.parse_notification(&IMPEDANCE);
        assert_reading(reading, 73.0, 500.0);
        assert!(adapter.is_complete(&Reading::new(73.0, 500.0)));
    }

    #[test]
    fn end_frame_completes_weight_only_measurement() {
        let mut adapter = EsCs20mAdapter::default();
        adapter.parse_notification(&STABLE_WEIGHT);
        let reading = adapter
            .parse_notification(&[0x55, 0xAA, 0x11, 0x00, 0x01, 0x00])
            .expect("end frame should echo the reading");
        assert!(adapter.is_complete(&reading));
    }

    #[test]
    fn foreign_frames_are_ignored() {
        let mut adapter = EsCs20mAdapter::default();
        assert_eq!(None, adapter.parse_notification(&[0x10, 0x0A, 0x01, 0, 0, 0]));
    }
}
