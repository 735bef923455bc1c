use async_trait::async_trait;

use super::codec::{be_u16, profile_bytes};
use super::{DeviceInfo, HandshakeContext, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::error::ScaleError;
use crate::measurement::{Reading, VendorComposition};

const SERVICE: &str = "f433bd80-75b8-11e2-97d9-0002a5d5c51b";
const COMMAND: &str = "1a2ea400-75b9-11e2-be05-0002a5d5c51b";
const MEASUREMENT: &str = "23b4fec0-75b9-11e2-972a-0002a5d5c51b";

const OP_USER_PROFILE: u8 = 0x10;
const FINAL_FRAME_LEN: usize = 20;

/// Exingtech Y1 ("VScale"): the scale computes composition itself once it
/// has the user's profile.
#[derive(Debug, Default)]
pub struct ExingtechAdapter {
    vendor: VendorComposition,
    done: bool,
}

#[async_trait]
impl ScaleAdapter for ExingtechAdapter {
    fn name(&self) -> &'static str {
        "exingtech-y1"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("vscale") || device.advertises(SERVICE)
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .handshake(HandshakeStyle::Custom)
            .notify(MEASUREMENT)
            .write(COMMAND)
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        let weight = f64::from(be_u16(data, 4)?) / 10.0;
        if data.len() != FINAL_FRAME_LEN {
            return Some(Reading::weight_only(weight));
        }
        let tenths = |offset| be_u16(data, offset).map(|raw| f64::from(raw) / 10.0);
        self.vendor = VendorComposition {
            body_fat_percent: tenths(6),
            muscle_mass: tenths(8),
            water_percent: tenths(10),
            bone_mass: tenths(12),
            visceral_fat: tenths(14),
        };
        self.done = true;
        Some(Reading::weight_only(weight))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.done && reading.has_valid_weight()
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.vendor
    }

    async fn on_connected(&mut self, ctx: &mut dyn HandshakeContext) -> Result<(), ScaleError> {
        ctx.subscribe(MEASUREMENT).await?;
        let (gender, age, height) = profile_bytes(ctx.profile());
        ctx.write(COMMAND, &[OP_USER_PROFILE, 0x01, gender, age, height], true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::adapters::testing::{RecordingContext, assert_close, assert_reading};

    #[tokio::test]
    async fn handshake_uploads_profile() {
        let mut adapter = ExingtechAdapter::default();
        let mut ctx = RecordingContext::default();
        adapter
            .on_connected(&mut ctx)
            .await
            .expect("handshake should succeed");
        // male, 30 years, 180 cm
        assert_eq!(
            format!("write {} 1001011eb4", crate::uuid::CharUuid::new(COMMAND)),
            ctx.calls[1]
        );
    }

    #[test]
    fn final_frame_carries_composition() {
        let mut adapter = ExingtechAdapter::default();
        let mut frame = vec![0u8; FINAL_FRAME_LEN];
        frame[4..6].copy_from_slice(&750u16.to_be_bytes());
        frame[6..8].copy_from_slice(&215u16.to_be_bytes());
        frame[8..10].copy_from_slice(&330u16.to_be_bytes());
        frame[14..16].copy_from_slice(&90u16.to_be_bytes());

        assert_reading(adapter.parse_notification(&frame[..8]), 75.0, 0.0);
        assert!(!adapter.is_complete(&Reading::weight_only(75.0)));

        assert_reading(adapter.parse_notification(&frame), 75.0, 0.0);
        assert!(adapter.is_complete(&Reading::weight_only(75.0)));
        assert_close(adapter.vendor_composition().body_fat_percent, 21.5);
        assert_close(adapter.vendor_composition().visceral_fat, 9.0);
    }
}
