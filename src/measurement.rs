use bon::Builder;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Kilograms per pound.
pub const KG_PER_LB: f64 = 0.453_592_37;

/// An interim reading accumulated from one or more notifications.
///
/// `impedance == 0.0` means the scale has not reported impedance yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Reading {
    /// Weight in kilograms (or in the scale's display unit before conversion).
    pub weight: f64,
    /// Bioelectrical impedance in ohms.
    pub impedance: f64,
}

impl Reading {
    /// Creates a reading.
    #[must_use]
    pub const fn new(weight: f64, impedance: f64) -> Self {
        Self { weight, impedance }
    }

    /// Creates a weight-only reading.
    #[must_use]
    pub const fn weight_only(weight: f64) -> Self {
        Self {
            weight,
            impedance: 0.0,
        }
    }

    /// Returns whether the weight is finite and positive.
    #[must_use]
    pub fn has_valid_weight(&self) -> bool {
        self.weight.is_finite() && self.weight > 0.0
    }

    /// Returns whether an impedance value has been reported.
    #[must_use]
    pub fn has_impedance(&self) -> bool {
        self.impedance.is_finite() && self.impedance > 0.0
    }

    /// Returns a copy with the weight converted from pounds to kilograms.
    #[must_use]
    pub fn pounds_to_kilograms(self) -> Self {
        Self {
            weight: self.weight * KG_PER_LB,
            ..self
        }
    }
}

/// Biological sex used by the body-composition regressions.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Gender {
    Male,
    Female,
}

/// Display unit requested by the caller.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WeightUnit {
    #[default]
    Kg,
    Lbs,
}

/// Per-session user description supplied by the caller.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct UserProfile {
    height_cm: f64,
    age_years: u32,
    gender: Gender,
    #[builder(default)]
    #[serde(default)]
    is_athlete: bool,
}

impl UserProfile {
    /// Height in centimetres.
    #[must_use]
    pub fn height_cm(&self) -> f64 {
        self.height_cm
    }

    /// Age in whole years.
    #[must_use]
    pub fn age_years(&self) -> u32 {
        self.age_years
    }

    #[must_use]
    pub fn gender(&self) -> Gender {
        self.gender
    }

    #[must_use]
    pub fn is_athlete(&self) -> bool {
        self.is_athlete
    }

    pub(crate) fn is_male(&self) -> bool {
        self.gender == Gender::Male
    }
}

/// Body-composition values reported by the scale itself.
///
/// Every field is optional; present values take precedence over the
/// impedance-based estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VendorComposition {
    pub body_fat_percent: Option<f64>,
    pub water_percent: Option<f64>,
    pub bone_mass: Option<f64>,
    pub muscle_mass: Option<f64>,
    pub visceral_fat: Option<f64>,
}

impl VendorComposition {
    /// Returns whether no vendor field has been populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body_fat_percent.is_none()
            && self.water_percent.is_none()
            && self.bone_mass.is_none()
            && self.muscle_mass.is_none()
            && self.visceral_fat.is_none()
    }
}

/// The finished measurement handed to exporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyComposition {
    pub weight: f64,
    pub impedance: f64,
    pub bmi: f64,
    pub body_fat_percent: f64,
    pub water_percent: f64,
    pub bone_mass: f64,
    pub muscle_mass: f64,
    pub visceral_fat: u32,
    pub physique_rating: u32,
    pub bmr: u32,
    pub metabolic_age: u32,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Reading::new(80.0, 0.0), true)]
    #[case(Reading::new(0.0, 500.0), false)]
    #[case(Reading::new(-1.0, 0.0), false)]
    #[case(Reading::new(f64::NAN, 0.0), false)]
    #[case(Reading::new(f64::INFINITY, 0.0), false)]
    fn has_valid_weight_rejects_non_positive_or_non_finite(
        #[case] reading: Reading,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, reading.has_valid_weight());
    }

    #[test]
    fn pounds_to_kilograms_keeps_impedance() {
        let converted = Reading::new(100.0, 480.0).pounds_to_kilograms();
        assert!((converted.weight - 45.359_237).abs() < 1e-9);
        assert_eq!(480.0, converted.impedance);
    }

    #[test]
    fn gender_parses_case_insensitively() {
        assert_eq!(Ok(Gender::Female), "Female".parse::<Gender>());
        assert_eq!(Ok(WeightUnit::Lbs), "LBS".parse::<WeightUnit>());
    }

    #[test]
    fn body_composition_serializes_camel_case_keys() {
        let payload = BodyComposition {
            weight: 80.0,
            impedance: 500.0,
            bmi: 24.69,
            body_fat_percent: 20.5,
            water_percent: 55.1,
            bone_mass: 2.7,
            muscle_mass: 34.4,
            visceral_fat: 8,
            physique_rating: 5,
            bmr: 1780,
            metabolic_age: 30,
        };
        let json = serde_json::to_value(&payload).expect("payload should serialize");
        assert_eq!(Some(20.5), json["bodyFatPercent"].as_f64());
        assert_eq!(Some(8), json["visceralFat"].as_u64());
        assert_eq!(Some(30), json["metabolicAge"].as_u64());
    }
}
