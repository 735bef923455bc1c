use async_trait::async_trait;

use super::codec::be_u16;
use super::{DeviceInfo, HandshakeContext, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::error::ScaleError;
use crate::measurement::Reading;

const SERVICE: &str = "352e3000-28e9-40b8-a361-6db4cca4147c";
const MEASUREMENT: &str = "352e3001-28e9-40b8-a361-6db4cca4147c";
const COMMAND: &str = "352e3002-28e9-40b8-a361-6db4cca4147c";

const FRAME_MEASUREMENT: u8 = 0x09;
const USER_ID: u8 = 0x01;

/// Soehnle Shape and Style body analysers.
#[derive(Debug, Default)]
pub struct SoehnleAdapter;

#[async_trait]
impl ScaleAdapter for SoehnleAdapter {
    fn name(&self) -> &'static str {
        "soehnle"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.advertises(SERVICE)
            || device.name_starts_with("shape")
            || device.name_starts_with("style")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .handshake(HandshakeStyle::Custom)
            .notify(MEASUREMENT)
            .write(COMMAND)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < 15 || data[0] != FRAME_MEASUREMENT {
            return None;
        }
        let weight = f64::from(be_u16(data, 9)?) / 10.0;
        // Prefer the 50 kHz impedance; the 5 kHz one is only used by the app.
        let impedance = f64::from(be_u16(data, 13)?);
        Some(Reading::new(weight, impedance))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        reading.has_valid_weight() && reading.has_impedance()
    }

    async fn on_connected(&mut self, ctx: &mut dyn HandshakeContext) -> Result<(), ScaleError> {
        ctx.subscribe(MEASUREMENT).await?;
        ctx.write(COMMAND, &[FRAME_MEASUREMENT, USER_ID], false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::adapters::testing::{RecordingContext, assert_reading};

    #[test]
    fn measurement_frame_uses_fifty_khz_impedance() {
        let frame = [
            0x09, 0x01, 0x07, 0xE8, 0x03, 0x0F, 0x08, 0x1E, 0x00, 0x02, 0xEE, 0x01, 0x90, 0x01,
            0xE0,
        ];
        let mut adapter = SoehnleAdapter;
        let reading = adapter.parse_notification(&frame);
        assert_reading(reading, 75.0, 480.0);
        assert!(adapter.is_complete(&Reading::new(75.0, 480.0)));
    }

    #[tokio::test]
    async fn handshake_requests_latest_measurement() {
        let mut ctx = RecordingContext::default();
        let mut adapter = SoehnleAdapter;
        adapter
            .on_connected(&mut ctx)
            .await
            .expect("handshake should succeed");
        assert_eq!(
            vec![
                format!("subscribe {}", crate::uuid::CharUuid::new(MEASUREMENT)),
                format!("write {} 0901", crate::uuid::CharUuid::new(COMMAND)),
            ],
            ctx.calls
        );
    }
}
