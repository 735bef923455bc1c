use async_trait::async_trait;

use super::codec::{be_u16, profile_bytes, with_xor_checksum};
use super::{DeviceInfo, HandshakeContext, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::error::ScaleError;
use crate::measurement::{Reading, UserProfile, VendorComposition};

const NOTIFY: &str = "fff4";
const WRITE: &str = "fff1";

const OP_PROFILE: u8 = 0xFE;
const FRAME_RESULT: u8 = 0xCF;
const UNIT_KG: u8 = 0x01;

/// Excelvan CF369BLE ("Electronic Scale").
#[derive(Debug, Default)]
pub struct ExcelvanAdapter {
    vendor: VendorComposition,
}

impl ExcelvanAdapter {
    pub(crate) fn profile_command(profile: &UserProfile) -> Vec<u8> {
        let (gender, age, height) = profile_bytes(profile);
        let activity = if profile.is_athlete() { 0x02 } else { 0x00 };
        with_xor_checksum(
            vec![OP_PROFILE, 0x01, gender, activity, height, age, UNIT_KG],
            1,
        )
    }
}

#[async_trait]
impl ScaleAdapter for ExcelvanAdapter {
    fn name(&self) -> &'static str {
        "excelvan-cf369"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("electronic scale") || device.name_contains("cf369")
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
        if data.len() < 16 || data[0] != FRAME_RESULT {
            return None;
        }
        let weight = f64::from(be_u16(data, 4)?) / 10.0;
        self.vendor = VendorComposition {
            body_fat_percent: Some(f64::from(be_u16(data, 6)?) / 10.0),
            bone_mass: Some(f64::from(data[8]) / 10.0),
            muscle_mass: Some(f64::from(be_u16(data, 9)?) / 10.0),
            visceral_fat: Some(f64::from(data[11])),
            water_percent: Some(f64::from(be_u16(data, 12)?) / 10.0),
        };
        Some(Reading::weight_only(weight))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        reading.has_valid_weight()
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.vendor
    }

    async fn on_connected(&mut self, ctx: &mut dyn HandshakeContext) -> Result<(), ScaleError> {
        ctx.subscribe(NOTIFY).await?;
        let command = Self::profile_command(ctx.profile());
        ctx.write(WRITE, &command, false).await
    }
}
