use async_trait::async_trait;

use super::codec::{be_u16, profile_bytes, sum_checksum};
use super::{DeviceInfo, HandshakeContext, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::error::ScaleError;
use crate::measurement::{Reading, UserProfile, VendorComposition};

const NOTIFY: &str = "fff1";
const WRITE: &str = "fff2";

const HEADER: [u8; 2] = [0xFF, 0xA5];
const FRAME_LEN: usize = 8;

const KIND_WEIGHT_LIVE: u8 = 0xA0;
const KIND_WEIGHT_STABLE: u8 = 0xAA;
const KIND_FAT: u8 = 0xB0;
const KIND_MUSCLE: u8 = 0xC0;
const KIND_BMR: u8 = 0xD0;

const SEEN_WEIGHT: u8 = 0x01;
const SEEN_FAT: u8 = 0x02;
const SEEN_MUSCLE: u8 = 0x04;
const SEEN_BMR: u8 = 0x08;
const SEEN_ALL: u8 = SEEN_WEIGHT | SEEN_FAT | SEEN_MUSCLE | SEEN_BMR;

/// Senssun body-fat scales: one sub-frame per value family, selected by a
/// frame-type byte.
#[derive(Debug, Default)]
pub struct SenssunAdapter {
    seen: u8,
    weight: f64,
    vendor: VendorComposition,
}

impl SenssunAdapter {
    fn profile_command(profile: &UserProfile) -> Vec<u8> {
        let (gender, age, height) = profile_bytes(profile);
        let mut frame = vec![0xA5, 0x10, (gender << 7) | (age & 0x7F), height, 0x00, 0x00, 0x00];
        frame.push(sum_checksum(&frame[1..]));
        frame
    }
}

#[async_trait]
impl ScaleAdapter for SenssunAdapter {
    fn name(&self) -> &'static str {
        "senssun"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        device.name_contains("senssun")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .handshake(HandshakeStyle::Custom)
            .notify(NOTIFY)
            .write(WRITE)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        if data.len() < FRAME_LEN || data[..2] != HEADER {
            return None;
        }
        if sum_checksum(&data[2..7]) != data[7] {
            return None;
        }
        let tenths = |offset| be_u16(data, offset).map(|raw| f64::from(raw) / 10.0);
        match data[2] {
            KIND_WEIGHT_LIVE => self.weight = tenths(3)?,
            KIND_WEIGHT_STABLE => {
                self.weight = tenths(3)?;
                self.seen |= SEEN_WEIGHT;
            }
            KIND_FAT => {
                self.vendor.body_fat_percent = tenths(3);
                self.vendor.water_percent = tenths(5);
                self.seen |= SEEN_FAT;
            }
            KIND_MUSCLE => {
                self.vendor.muscle_mass = tenths(3);
                self.vendor.bone_mass = tenths(5);
                self.seen |= SEEN_MUSCLE;
            }
            // The scale's own BMR estimate is superseded by the formula engine.
            KIND_BMR => self.seen |= SEEN_BMR,
            _ => return None,
        }
        Some(Reading::weight_only(self.weight))
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.seen == SEEN_ALL && reading.has_valid_weight()
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
