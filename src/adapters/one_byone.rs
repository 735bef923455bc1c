use async_trait::async_trait;

use super::codec::{le_u16, profile_bytes, with_xor_checksum};
use super::{DeviceInfo, HandshakeContext, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::error::ScaleError;
use crate::measurement::{Reading, UserProfile};

const NOTIFY: &str = "ffb2";
const WRITE: &str = "ffb1";

const FRAME_MEASUREMENT: u8 = 0xCF;
const OP_PROFILE: u8 = 0xFD;

/// 1byone "Health Scale".
#[derive(Debug, Default)]
pub struct OneByoneAdapter {
    stable: bool,
}

impl OneByoneAdapter {
    fn profile_command(profile: &UserProfile) -> Vec<u8> {
        let (gender, age, height) = profile_bytes(profile);
        with_xor_checksum(
            vec![OP_PROFILE, 0x37, 0x01, gender, age, height, 0x00, 0x00, 0x00],
            0,
        )
    }
}

#[async_trait]
impl ScaleAdapter for OneByoneAdapter {
    fn name(&self) -> &'static str {
        "1byone"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("health scale")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .handshake(HandshakeStyle::Custom)
            .notify(NOTIFY)
            .write(WRITE)
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 10 || data[0] != FRAME_MEASUREMENT {
            return None;
        }
        let impedance = f64::from(le_u16(data, 1)?);
        let weight = f64::from(le_u16(data, 3)?) / 100.0;
        self.stable = data[9] == 0x00;
        Some(Reading::new(weight, impedance))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.stable && reading.has_valid_weight()
    }

    async fn on_connected(&mut self, ctx: &mut dyn HandshakeContext) -> Result<(), ScaleError> {
        ctx.subscribe(NOTIFY).await?;
        let command = Self::profile_command(ctx.profile());
        ctx.write(WRITE, &command, false).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::adapters::testing::{RecordingContext, assert_reading};

    #[test]
    fn stable_frame_reports_impedance() {
        let frame = [0xCF, 0xE0, 0x01, 0x4C, 0x1D, 0, 0, 0, 0, 0x00];
        let mut adapter = OneByoneAdapter::default();
        assert_reading(adapter.parse_notification(&frame), 75.0, 480.0);
        assert!(adapter.is_complete(&Reading::new(75.0, 480.0)));
    }

    #[test]
    fn measuring_frame_is_not_complete() {
        let frame = [0xCF, 0x00, 0x00, 0x4C, 0x1D, 0, 0, 0, 0, 0x01];
        let mut adapter = OneByoneAdapter::default();
        adapter.parse_notification(&frame);
        assert!(!adapter.is_complete(&Reading::weight_only(75.0)));
    }

    #[tokio::test]
    async fn handshake_uploads_profile_with_checksum() {
        let mut adapter = OneByoneAdapter::default();
        let mut ctx = RecordingContext::default();
        adapter
            .on_connected(&mut ctx)
            .await
            .expect("handshake should succeed");
        // 0xFD ^ 0x37 ^ 0x01 ^ 0x01 ^ 0x1E ^ 0xB4 = 0x60
        assert_eq!("write ffb1 fd3701011eb400000060", ctx.calls[1]);
    }
}
