//! Bluetooth SIG Weight Scale (0x181D) and Body Composition (0x181B) services.

use super::codec::{SigFields, le_u16};
use super::{CharBinding, DeviceInfo, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::measurement::{KG_PER_LB, Reading, VendorComposition};
use crate::uuid::CharUuid;

pub(crate) const WEIGHT_MEASUREMENT: &str = "2a9d";
pub(crate) const BODY_COMPOSITION_MEASUREMENT: &str = "2a9c";

/// Name fragments of scales that advertise the SIG services but need their
/// own adapter. Lower-case.
const EXCLUDED_NAMES: [&str; 6] = ["mibfs", "mibcs", "mi scale", "mi_scale", "sbf72", "bf915"];

/// Name prefixes claimed by Soehnle (`shape`, `style`) and Medisana (`0203b`).
/// Lower-case.
const EXCLUDED_PREFIXES: [&str; 3] = ["shape", "style", "0203b"];

/// Fields decoded from a Body Composition Measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct SigComposition {
    pub(crate) body_fat_percent: f64,
    pub(crate) muscle_mass: Option<f64>,
    pub(crate) water_mass: Option<f64>,
    pub(crate) impedance: Option<f64>,
    pub(crate) weight: Option<f64>,
}

fn mass(raw: u16, imperial: bool) -> f64 {
    if imperial {
        f64::from(raw) * 0.01 * KG_PER_LB
    } else {
        f64::from(raw) * 0.005
    }
}

/// Decodes a Weight Measurement (0x2A9D) into kilograms.
pub(crate) fn parse_weight_measurement(data: &[u8]) -> Option<f64> {
    let flags = *data.first()?;
    let raw = le_u16(data, 1)?;
    // 0xFFFF is "measurement unsuccessful".
    if raw == 0xFFFF {
        return None;
    }
    Some(mass(raw, flags & 0x01 != 0))
}

/// Decodes a Body Composition Measurement (0x2A9C).
pub(crate) fn parse_body_composition(data: &[u8]) -> Option<SigComposition> {
    let mut fields = SigFields::new(data)?;
    let imperial = fields.flag(0);
    let body_fat = fields.take_u16()?;
    if body_fat == 0xFFFF {
        return None;
    }
    if fields.flag(1) {
        fields.skip(7);
    }
    if fields.flag(2) {
        fields.skip(1);
    }
    // basal metabolism, muscle percentage
    let _ = fields.take_u16_if(3);
    let _ = fields.take_u16_if(4);
    let muscle_mass = fields.take_u16_if(5).map(|raw| mass(raw, imperial));
    // fat free mass, soft lean mass
    let _ = fields.take_u16_if(6);
    let _ = fields.take_u16_if(7);
    let water_mass = fields.take_u16_if(8).map(|raw| mass(raw, imperial));
    let impedance = fields.take_u16_if(9).map(|raw| f64::from(raw) / 10.0);
    let weight = fields.take_u16_if(10).map(|raw| mass(raw, imperial));
    Some(SigComposition {
        body_fat_percent: f64::from(body_fat) / 10.0,
        muscle_mass,
        water_mass,
        impedance,
        weight,
    })
}

/// Merges a composition frame into vendor fields, deriving water percentage
/// from the water mass once a weight is known.
pub(crate) fn composition_to_vendor(
    composition: &SigComposition,
    weight: f64,
) -> VendorComposition {
    VendorComposition {
        body_fat_percent: Some(composition.body_fat_percent),
        water_percent: composition
            .water_mass
            .filter(|_| weight > 0.0)
            .map(|water| water / weight * 100.0),
        bone_mass: None,
        muscle_mass: composition.muscle_mass,
        visceral_fat: None,
    }
}

/// Catch-all for scales that implement the standard SIG profiles.
///
/// Sits last in the registry.
#[derive(Debug, Default)]
pub struct StandardGattAdapter {
    expects_composition: bool,
    weight: f64,
    impedance: f64,
    composition: Option<SigComposition>,
}

impl StandardGattAdapter {
    fn current(&self) -> Reading {
        Reading::new(self.weight, self.impedance)
    }
}

impl ScaleAdapter for StandardGattAdapter {
    fn name(&self) -> &'static str {
        "standard-gatt"
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        if EXCLUDED_NAMES
            .iter()
            .any(|excluded| device.name_contains(excluded))
            || EXCLUDED_PREFIXES
                .iter()
                .any(|prefix| device.name_starts_with(prefix))
        {
            return false;
        }
        self.expects_composition = device.advertises("181b");
        self.expects_composition || device.advertises("181d")
    }

    fn layout(&self) -> ProtocolLayout {
        ProtocolLayout::builder()
            .handshake(HandshakeStyle::MultiCharacteristic)
            .bindings(vec![
                CharBinding::notify(WEIGHT_MEASUREMENT),
                CharBinding::notify(BODY_COMPOSITION_MEASUREMENT),
            ])
            .normalizes_weight(true)
            .build()
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        self.weight = parse_weight_measurement(data)?;
        Some(self.current())
    }

    fn parse_char_notification(&mut self, source: &CharUuid, data: &[u8]) -> Option<Reading> {
        if source.matches(WEIGHT_MEASUREMENT) {
            self.parse_notification(data)
        } else if source.matches(BODY_COMPOSITION_MEASUREMENT) {
            let composition = parse_body_composition(data)?;
            if let Some(weight) = composition.weight {
                self.weight = weight;
            }
            if let Some(impedance) = composition.impedance {
                self.impedance = impedance;
            }
            self.composition = Some(composition);
            Some(self.current())
        } else {
            None
        }
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        reading.has_valid_weight() && (self.composition.is_some() || !self.expects_composition)
    }

    fn vendor_composition(&self) -> VendorComposition {
        self.composition
            .map(|composition| composition_to_vendor(&composition, self.weight))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::adapters::testing::{assert_close, assert_reading};

    #[rstest]
    #[case("MIBFS")]
    #[case("MI SCALE2")]
    #[case("SBF72")]
    #[case("BF915")]
    #[case("Shape200")]
    #[case("Style100 Scale")]
    #[case("0203B")]
    fn excluded_names_are_left_to_specific_adapters(#[case] name: &str) {
        let mut adapter = StandardGattAdapter::default();
        assert!(!adapter.matches(&DeviceInfo::new(name, ["181b", "181d"])));
    }

    #[rstest]
    #[case("Lifestyle Scale")]
    #[case("Reshape Body")]
    fn names_merely_containing_soehnle_words_are_claimed(#[case] name: &str) {
        let mut adapter = StandardGattAdapter::default();
        assert!(adapter.matches(&DeviceInfo::new(name, ["181d"])));
    }

    #[test]
    fn weight_only_device_completes_on_weight() {
        let mut adapter = StandardGattAdapter::default();
        assert!(adapter.matches(&DeviceInfo::new("Generic Scale", ["181d"])));
        // 15000 * 0.005 = 75 kg.
        let reading = adapter
            .parse_char_notification(&CharUuid::new(WEIGHT_MEASUREMENT), &[0x00, 0x98, 0x3A]);
        assert_reading(reading, 75.0, 0.0);
        assert!(adapter.is_complete(&Reading::weight_only(75.0)));
    }

    #[test]
    fn composition_device_waits_for_composition_frame() {
        let mut adapter = StandardGattAdapter::default();
        assert!(adapter.matches(&DeviceInfo::new("Generic Scale", ["181b", "181d"])));
        adapter.parse_char_notification(&CharUuid::new(WEIGHT_MEASUREMENT), &[0x00, 0x98, 0x3A]);
        assert!(!adapter.is_complete(&Reading::weight_only(75.0)));

        // flags: muscle mass (5), body water mass (8), impedance (9).
        let flags: u16 = (1 << 5) | (1 << 8) | (1 << 9);
        let mut frame = flags.to_le_bytes().to_vec();
        frame.extend_from_slice(&215u16.to_le_bytes());
        frame.extend_from_slice(&6_400u16.to_le_bytes());
        frame.extend_from_slice(&8_100u16.to_le_bytes());
        frame.extend_from_slice(&5_120u16.to_le_bytes());

        let reading = adapter
            .parse_char_notification(&CharUuid::new(BODY_COMPOSITION_MEASUREMENT), &frame);
        assert_reading(reading, 75.0, 512.0);
        assert!(adapter.is_complete(&Reading::new(75.0, 512.0)));

        let vendor = adapter.vendor_composition();
        assert_close(vendor.body_fat_percent, 21.5);
        assert_close(vendor.muscle_mass, 32.0);
        assert_close(vendor.water_percent, 54.0);
    }

    #[test]
    fn composition_skips_timestamp_and_user() {
        let flags: u16 = (1 << 1) | (1 << 2) | (1 << 10);
        let mut frame = flags.to_le_bytes().to_vec();
        frame.extend_from_slice(&200u16.to_le_bytes());
        frame.extend_from_slice(&[0xE8, 0x07, 1, 2, 3, 4, 5]);
        frame.push(0x01);
        frame.extend_from_slice(&16_000u16.to_le_bytes());
        let composition = parse_body_composition(&frame).expect("frame should decode");
        assert_close(composition.weight, 80.0);
        assert_eq!(None, composition.impedance);
    }

    #[test]
    fn unsuccessful_weight_is_ignored() {
        assert_eq!(None, parse_weight_measurement(&[0x00, 0xFF, 0xFF]));
    }
}
