use super::codec::le_u16;
use super::{DeviceInfo, ProtocolLayout, ScaleAdapter};
use crate::measurement::{KG_PER_LB, Reading};

const WEIGHT_MEASUREMENT: &str = "2a9d";
const BODY_COMPOSITION_MEASUREMENT: &str = "2a9c";
const CUSTOM_CONFIG: &str = "00001542-0000-3512-2118-0009af100700";

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
enum Variant {
    /// Mi Smart Scale: weight only, on the SIG weight characteristic.
    #[default]
    WeightOnly,
    /// Mi Body Composition Scale (MIBFS): weight and impedance.
    BodyComposition,
}

#[derive(Debug, Clone, Copy)]
struct Control {
    pounds: bool,
    catty: bool,
    stabilized: bool,
    removed: bool,
    has_impedance: bool,
}

/// Xiaomi Mi Scale v1 and Mi Body Composition Scale v2.
#[derive(Debug, Default)]
pub struct XiaomiAdapter {
    variant: Variant,
    stable: Option<Reading>,
    done: bool,
}

impl XiaomiAdapter {
    fn to_kilograms(raw: u16, control: Control) -> f64 {
        let raw = f64::from(raw);
        if control.pounds {
            raw / 100.0 * KG_PER_LB
        } else if control.catty {
            raw / 100.0 * 0.5
        } else {
            raw / 200.0
        }
    }

    fn parse_v1(data: &[u8]) -> Option<(Control, Reading)> {
        if data.len() < 3 {
            return None;
        }
        let flags = data[0];
        let control = Control {
            pounds: flags & 0x01 != 0,
            catty: flags & 0x10 != 0,
            stabilized: flags & 0x20 != 0,
            removed: flags & 0x80 != 0,
            has_impedance: false,
        };
        let weight = Self::to_kilograms(le_u16(data, 1)?, control);
        Some((control, Reading::weight_only(weight)))
    }

    fn parse_v2(data: &[u8]) -> Option<(Control, Reading)> {
        if data.len() < 13 {
            return None;
        }
        let control = Control {
            pounds: data[0] & 0x01 != 0,
            catty: data[1] & 0x40 != 0,
            stabilized: data[1] & 0x20 != 0,
            removed: data[1] & 0x80 != 0,
            has_impedance: data[1] & 0x02 != 0,
        };
        let weight = Self::to_kilograms(le_u16(data, 11)?, control);
        let impedance = le_u16(data, 9)?;
        let impedance = if control.has_impedance && impedance > 0 && impedance < 3_000 {
            f64::from(impedance)
        } else {
            0.0
        };
        Some((control, Reading::new(weight, impedance)))
    }
}

impl ScaleAdapter for XiaomiAdapter {
    fn name(&self) -> &'static str {
        match self.variant {
            Variant::WeightOnly => "xiaomi-mi-scale",
            Variant::BodyComposition => "xiaomi-mi-scale-2",
        }
    }

    fn matches(&mut self, device: &DeviceInfo) -> bool {
        if device.name_contains("mibfs") || device.name_contains("mibcs") {
            self.variant = Variant::BodyComposition;
            true
        } else if device.name_contains("mi scale") || device.name_contains("mi_scale") {
            self.variant = Variant::WeightOnly;
            true
        } else {
            false
        }
    }

    fn layout(&self) -> ProtocolLayout {
        match self.variant {
            Variant::WeightOnly => ProtocolLayout::builder()
                .notify(WEIGHT_MEASUREMENT)
                .normalizes_weight(true)
                .build(),
            Variant::BodyComposition => ProtocolLayout::builder()
                .notify(BODY_COMPOSITION_MEASUREMENT)
                .write(CUSTOM_CONFIG)
                // Pin the scale display to kilograms.
                .unlock_command(vec![0x06, 0x04, 0x00, 0x00])
                .normalizes_weight(true)
                .build(),
        }
    }

    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
        let (control, reading) = match self.variant {
            Variant::WeightOnly => Self::parse_v1(data)?,
            Variant::BodyComposition => Self::parse_v2(data)?,
        };
        if control.removed {
            // Stepping off after a stable weight ends a measurement without impedance.
            let stable = self.stable?;
            self.done = true;
            return Some(stable);
        }
        if control.stabilized && reading.has_valid_weight() {
            self.stable = Some(reading);
            if self.variant == Variant::WeightOnly || reading.has_impedance() {
                self.done = true;
            }
        }
        Some(reading)
    }

    fn is_complete(&self, reading: &Reading) -> bool {
        self.done && reading.has_valid_weight()
    }
}
