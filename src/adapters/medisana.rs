use async_trait::async_trait;

use super::codec::le_u16;
use super::{DeviceInfo, HandshakeContext, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::error::ScaleError;
use crate::measurement::{Reading, VendorComposition};
use crate::uuid::CharUuid;

const WEIGHT: &str = "8a21";
const FEATURE: &str = "8a22";
const COMMAND: &str = "8a81";

const OP_SET_TIME: u8 = 0x02;
const EPOCH_2010: i64 = 1_262_304_000;

const BS444_PREFIXES: [&str; 3] = ["013197", "013198", "0202b6"];

/// Medisana BS440/BS444 family.
#[derive(Debug, Default)]
pub struct MedisanaAdapter {
    /// BS444 clocks count from 2010; BS440 from the Unix epoch.
    epoch_2010: bool,
    weight: f64,
    vendor: VendorComposition,
    features: bool,
}

impl MedisanaAdapter {
    fn time_command(&self) -> Vec<u8> {
        let mut now = time::OffsetDateTime::now_utc().unix_timestamp();
        if self.epoch_2010 {
            now -= EPOCH_2010;
        }
        let seconds = u32::try_from(now).unwrap_or(0);
        let mut frame = vec![OP_SET_TIME];
        frame.extend_from_slice(&seconds.to_le_bytes());
        frame
    }

    fn parse_features(&mut self, data: &[u8]) -> Option<()> {
        let tenths = |offset| le_u16(data, offset).map(|raw| f64::from(raw & 0x0FFF) / 10.0);
        self.vendor = VendorComposition {
            body_fat_percent: Some(tenths(8)?),
            water_percent: tenths(10),
            muscle_mass: None,
            bone_mass: tenths(14),
            visceral_fat: None,
        };
        // Muscle is reported as a percentage of body weight.
        if let Some(muscle_percent) = tenths(12)
            && self.weight > 0.0
        {
            self.vendor.muscle_mass = Some(self.weight * muscle_percent / 100.0);
        }
        self.features = true;
        Some(())
    }
}

#[async_trait]
impl ScaleAdapter for MedisanaAdapter {
    fn name(&self) -> &'static str {
        "medisana-bs44x"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        if BS444_PREFIXES
            .iter()
            .any(|prefix| device.name_starts_with(prefix))
        {
            self.epoch_2010 = true;
            true
        } else {
            device.name_starts_with("0203b") || device.advertises("78b2")
        }
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .handshake(HandshakeStyle::Custom)
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 3 {
            return None;
        }
        self.weight = f64::from(le_u16(data, 1)?) / 100.0;
        Some(Reading::weight_only(self.weight))
    }

    fn parse_char_notification(&mut self, source: &CharUuid, data: &[u8]) -> Option<Reading> {
        if source.matches(WEIGHT) {
            self.parse_notification(data)
        } else if source.matches(FEATURE) {
            self.parse_features(data)?;
            Some(Reading::weight_only(self.weight))
        } else {
            None
        }
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.features && reading.has_valid_weight()
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.vendor
    }

    async fn on_connected(&mut self, ctx: &mut dyn HandshakeContext) -> Result<(), ScaleError> {
        ctx.subscribe(FEATURE).await?;
        ctx.subscribe(WEIGHT).await?;
        ctx.write(COMMAND, &self.time_command(), true).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::adapters::testing::{RecordingContext, assert_close, assert_reading};

    #[test]
    fn weight_then_features_completes() {
        let mut adapter = MedisanaAdapter::default();
        let weight = adapter.parse_char_notification(&CharUuid::new(WEIGHT), &[0x1D, 0x4C, 0x1D]);
        assert_reading(weight, 75.0, 0.0);
        assert!(!adapter.is_complete(&Reading::weight_only(75.0)));

        let mut features = vec![0u8; 16];
        features[8..10].copy_from_slice(&(0xF000u16 | 215).to_le_bytes());
        features[10..12].copy_from_slice(&540u16.to_le_bytes());
        features[12..14].copy_from_slice(&400u16.to_le_bytes());
        features[14..16].copy_from_slice(&30u16.to_le_bytes());
        let reading = adapter.parse_char_notification(&CharUuid::new(FEATURE), &features);
        assert_reading(reading, 75.0, 0.0);
        assert!(adapter.is_complete(&Reading::weight_only(75.0)));

        let vendor = adapter.vendor_composition();
        assert_close(vendor.body_fat_percent, 21.5);
        assert_close(vendor.water_percent, 54.0);
        assert_close(vendor.muscle_mass, 30.0);
        assert_close(vendor.bone_mass, 3.0);
    }

    #[tokio::test]
    async fn handshake_sets_clock_after_subscribing() {
        let mut adapter = MedisanaAdapter::default();
        assert!(adapter.matches(&DeviceInfo::new("013197", Vec::<&str>::new())));
        let mut ctx = RecordingContext::default();
        adapter
            .on_connected(&mut ctx)
            .await
            .expect("handshake should succeed");
        assert_eq!(3, ctx.calls.len());
        assert_eq!("subscribe 8a22", ctx.calls[0]);
        assert_eq!("subscribe 8a21", ctx.calls[1]);
        assert!(ctx.calls[2].starts_with("write 8a81 02"));
    }
}
