use async_trait::async_trait;
use tracing::debug;

use super::standard::{
    BODY_COMPOSITION_MEASUREMENT, SigComposition, WEIGHT_MEASUREMENT, composition_to_vendor,
    parse_body_composition, parse_weight_measurement,
};
use super::{DeviceInfo, HandshakeContext, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::error::ScaleError;
use crate::measurement::{Reading, VendorComposition};
use crate::uuid::CharUuid;

const USER_CONTROL_POINT: &str = "2a9f";

const OP_CONSENT: u8 = 0x02;
const OP_RESPONSE: u8 = 0x20;
const USER_INDEX: u8 = 0x01;
const CONSENT_CODE: u16 = 0x0000;

/// Sanitas SBF72 and Beurer BF915: standard SIG measurements gated behind a
/// User Data Service consent.
#[derive(Debug, Default)]
pub struct SanitasSbf72Adapter {
    weight: f64,
    impedance: f64,
    composition: Option<SigComposition>,
}

impl SanitasSbf72Adapter {
    fn consent_command() -> Vec<u8> {
        let mut frame = vec![OP_CONSENT, USER_INDEX];
        frame.extend_from_slice(&CONSENT_CODE.to_le_bytes());
        frame
    }
}

#[async_trait]
impl ScaleAdapter for SanitasSbf72Adapter {
    fn name(&self) -> &'static str {
        "sanitas-sbf72"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("sbf72") || device.name_contains("bf915")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .handshake(HandshakeStyle::Custom)
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        self.weight = parse_weight_measurement(data)?;
        Some(Reading::new(self.weight, self.impedance))
    }

    fn parse_char_notification(&mut self, source: &CharUuid, data: &[u8]) -> Option<Reading> {
        if source.matches(WEIGHT_MEASUREMENT) {
            self.parse_notification(data)
        } else if source.matches(BODY_COMPOSITION_MEASUREMENT) {
            let composition = parse_body_composition(data)?;
            if let Some(impedance) = composition.impedance {
                self.impedance = impedance;
            }
            self.composition = Some(composition);
            Some(Reading::new(self.weight, self.impedance))
        } else {
            if source.matches(USER_CONTROL_POINT) && data.first() == Some(&OP_RESPONSE) {
                debug!(response = ?data.get(1..), "sbf72 user control point response");
            }
            None
        }
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        reading.has_valid_weight() && self.composition.is_some()
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.composition
            .map(|composition| composition_to_vendor(&composition, self.weight))
            .unwrap_or_default()
    }

    async fn on_connected(&mut self, ctx: &mut dyn HandshakeContext) -> Result<(), ScaleError> {
        ctx.subscribe(USER_CONTROL_POINT).await?;
        ctx.write(USER_CONTROL_POINT, &Self::consent_command(), true)
            .await?;
        ctx.subscribe(WEIGHT_MEASUREMENT).await?;
        ctx.subscribe(BODY_COMPOSITION_MEASUREMENT).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::adapters::testing::RecordingContext;

    #[tokio::test]
    async fn handshake_grants_consent_before_subscribing_measurements() {
        let mut adapter = SanitasSbf72Adapter::default();
        let mut ctx = RecordingContext::default();
        adapter
            .on_connected(&mut ctx)
            .await
            .expect("handshake should succeed");

        assert_eq!(
            vec![
                "subscribe 2a9f".to_string(),
                "write 2a9f 02010000".to_string(),
                "subscribe 2a9d".to_string(),
                "subscribe 2a9c".to_string(),
            ],
            ctx.calls
        );
    }

    #[test]
    fn completes_once_composition_arrives() {
        let mut adapter = SanitasSbf72Adapter::default();
        adapter.parse_char_notification(&CharUuid::new(WEIGHT_MEASUREMENT), &[0x00, 0x98, 0x3A]);
        assert!(!adapter.is_complete(&Reading::weight_only(75.0)));

        let flags: u16 = 1 << 9;
        let mut frame = flags.to_le_bytes().to_vec();
        frame.extend_from_slice(&250u16.to_le_bytes());
        frame.extend_from_slice(&4_800u16.to_le_bytes());
        let reading = adapter
            .parse_char_notification(&CharUuid::new(BODY_COMPOSITION_MEASUREMENT), &frame)
            .expect("composition should produce a reading");
        assert!(adapter.is_complete(&reading));
        assert_eq!(Some(25.0), adapter.vendor_composition().body_fat_percent);
    }
}
