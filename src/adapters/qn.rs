use tracing::debug;

use super::codec::{be_u16, plausible_weight, seconds_since_2000, sum_checksum};
use super::{DeviceInfo, OutgoingWrite, ProtocolLayout, ScaleAdapter};
use crate::measurement::Reading;

const NOTIFY: &str = "ffe1";
const WRITE: &str = "ffe3";
const ALT_NOTIFY: &str = "fff1";
const ALT_WRITE: &str = "fff2";

const FRAME_MEASUREMENT: u8 = 0x10;
const FRAME_SCALE_INFO: u8 = 0x12;
const FRAME_TIME_REQUEST: u8 = 0x14;

const NAME_MARKERS: [&str; 4] = ["qn-scale", "renpho", "fitindex", "es-26"];

/// QN protocol scales (Renpho, FITINDEX and other QN-based OEM models).
///
/// Claims a device only when it advertises the QN service (`ffe0` or the
/// `fff0` variant), which is what separates it from [`super::RenphoAdapter`].
#[derive(Debug, Default)]
pub struct QnAdapter {
    divisor: Option<f64>,
    outgoing: Vec<OutgoingWrite>,
    write_uuid: Option<&'static str>,
}

impl QnAdapter {
    fn config_command() -> Vec<u8> {
        let mut frame = vec![0x13, 0x09, 0x15, 0x01, 0x10, 0x00, 0x00, 0x00];
        frame.push(sum_checksum(&frame));
        frame
    }

    fn time_command() -> Vec<u8> {
        let seconds = seconds_since_2000(time::OffsetDateTime::now_utc());
        let mut frame = vec![0x20, 0x08, 0x15];
        frame.extend_from_slice(&seconds.to_le_bytes());
        frame.push(sum_checksum(&frame));
        frame
    }

    fn queue(&mut self, payload: Vec<u8>) {
        let uuid = self.write_uuid.unwrap_or(WRITE);
        self.outgoing.push(OutgoingWrite::new(uuid, payload));
    }

    fn weight_from_raw(&self, raw: u16) -> Option<f64> {
        let raw = f64::from(raw);
        if let Some(divisor) = self.divisor {
            return Some(raw / divisor);
        }
        // Older firmware never sends the scale-info frame; guess the divisor.
        [100.0, 10.0]
            .into_iter()
            .map(|divisor| raw / divisor)
            .find(|weight| plausible_weight(*weight))
    }

    fn parse_measurement(&self, data: &[u8]) -> Option<Reading> {
        if data.len() < 10 {
            return None;
        }
        let weight = self.weight_from_raw(be_u16(data, 3)?)?;
        if data[5] != 0x01 {
            return Some(Reading::weight_only(weight));
        }
        let r1 = be_u16(data, 6)?;
        let r2 = be_u16(data, 8)?;
        let impedance = if r1 > 0 { r1 } else { r2 };
        Some(Reading::new(weight, f64::from(impedance)))
    }
}

impl ScaleAdapter for QnAdapter {
    fn name(&self) -> &'static str {
        "qn"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        let named = NAME_MARKERS
            .iter()
            .any(|marker| device.name_contains(marker));
        if !named {
            return false;
        }
        if device.advertises("ffe0") {
            self.write_uuid = Some(WRITE);
            true
        } else if device.advertises("fff0") {
            self.write_uuid = Some(ALT_WRITE);
            true
        } else {
            false
        }
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify(NOTIFY)
            .write(WRITE)
            .alt_notify(ALT_NOTIFY)
            .alt_write(ALT_WRITE)
            .unlock_command(Self::config_command())
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        match data.first().copied()? {
            FRAME_MEASUREMENT => self.parse_measurement(data),
            FRAME_SCALE_INFO => {
                if let Some(kind) = data.get(10) {
                    self.divisor = Some(if *kind == 0x01 { 100.0 } else { 10.0 });
                }
                debug!(divisor = ?self.divisor, "qn scale info received");
                self.queue(Self::config_command());
                None
            }
            FRAME_TIME_REQUEST => {
                self.queue(Self::time_command());
                None
            }
            _ => None,
        }
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        reading.weight > 10.0 && reading.impedance > 200.0
    }

    fn take_outgoing(&mut self) -> Vec<OutgoingWrite> {
        std::mem::take(&mut self.outgoing)
    }
}
