use tracing::{debug, warn};

use super::codec::{base10_float, le_u32};
use super::{CharBinding, DeviceInfo, HandshakeStyle, OutgoingWrite, ProtocolLayout, ScaleAdapter};
use crate::measurement::Reading;
use crate::uuid::CharUuid;

const MEASUREMENT: &str = "8a21";
const UPLOAD: &str = "8a82";
const DOWNLOAD: &str = "8a81";

const OP_PASSWORD: u8 = 0xA0;
const OP_CHALLENGE: u8 = 0xA1;
const OP_BROADCAST_TIME: u8 = 0x02;

/// Seconds between the Unix epoch and 2010-01-01T00:00:00Z.
const EPOCH_2010: i64 = 1_262_304_000;

/// Trisa Body Analyze: measurement indications encoded as base-10 floats,
/// plus a password/challenge pairing on the upload characteristic.
#[derive(Debug, Default)]
pub struct TrisaAdapter {
    password: Option<u32>,
    outgoing: Vec<OutgoingWrite>,
}

impl TrisaAdapter {
    fn handle_upload(&mut self, data: &[u8]) {
        match data.first().copied() {
            Some(OP_PASSWORD) => {
                self.password = le_u32(data, 1);
                debug!("trisa pairing password received");
            }
            Some(OP_CHALLENGE) => {
                let (Some(password), Some(challenge)) = (self.password, le_u32(data, 1)) else {
                    warn!("trisa challenge received before password");
                    return;
                };
                let mut answer = vec![OP_CHALLENGE];
                answer.extend_from_slice(&(challenge ^ password).to_le_bytes());
                self.outgoing.push(OutgoingWrite::new(DOWNLOAD, answer));
                self.outgoing
                    .push(OutgoingWrite::new(DOWNLOAD, Self::time_command()));
            }
            _ => {}
        }
    }

    fn time_command() -> Vec<u8> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let seconds = u32::try_from(now - EPOCH_2010).unwrap_or(0);
        let mut frame = vec![OP_BROADCAST_TIME];
        frame.extend_from_slice(&seconds.to_le_bytes());
        frame
    }

    fn parse_measurement(data: &[u8]) -> Option<Reading> {
        let flags = *data.first()?;
        let weight = base10_float(data, 1)?;
        let mut offset = 5;
        if flags & 0x01 != 0 {
            offset += 4;
        }
        if flags & 0x02 != 0 {
            offset += 4;
        }
        let impedance = if flags & 0x04 != 0 {
            let resistance = base10_float(data, offset)?;
            if resistance < 410.0 {
                3.0
            } else {
                0.3 * (resistance - 400.0)
            }
        } else {
            0.0
        };
        Some(Reading::new(weight, impedance))
    }
}

impl ScaleAdapter for TrisaAdapter {
    fn name(&self) -> &'static str {
        "trisa"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_starts_with("01257b")
            || device.name_starts_with("11257b")
            || device.advertises("7802")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .handshake(HandshakeStyle::MultiCharacteristic)
            .bindings(vec![
                CharBinding::notify(UPLOAD),
                CharBinding::notify(MEASUREMENT),
                CharBinding::write(DOWNLOAD),
            ])
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        Self::parse_measurement(data)
    }

    fn parse_char_notification(&mut self, source: &CharUuid, data: &[u8]) -> Option<Reading> {
        if source.matches(UPLOAD) {
            self.handle_upload(data);
            None
        } else if source.matches(MEASUREMENT) {
            Self::parse_measurement(data)
        } else {
            None
        }
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        reading.has_valid_weight()
    }

    fn take_outgoing(&mut self) -> Vec<OutgoingWrite> {
        std::mem::take(&mut self.outgoing)
    }
}
