//! Body-composition formulas.
//!
//! Every function here is pure: `(weight, impedance, vendor fields, profile)`
//! in, [`BodyComposition`] out.

use thiserror::Error;
use tracing::instrument;

use crate::measurement::{BodyComposition, Gender, Reading, UserProfile, VendorComposition};

const MIN_BODY_FAT_PERCENT: f64 = 3.0;
const MAX_BODY_FAT_PERCENT: f64 = 60.0;
const LBM_CAP_RATIO: f64 = 0.96;
const BONE_RATIO: f64 = 0.042;
const MIN_VISCERAL_FAT: i64 = 1;
const MAX_VISCERAL_FAT: i64 = 59;
const MIN_METABOLIC_AGE: i64 = 12;
const IDEAL_BMR_AGE: u32 = 25;
const ATHLETE_BMR_FACTOR: f64 = 1.05;
const HIGH_MUSCLE_RATIO: f64 = 0.45;
const MID_MUSCLE_RATIO: f64 = 0.38;

/// Errors returned when a measurement cannot be turned into metrics.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum MetricsError {
    #[error("weight {weight} kg is not a positive finite value")]
    InvalidWeight { weight: f64 },
    #[error("height {height_cm} cm is not a positive finite value")]
    InvalidHeight { height_cm: f64 },
}

/// Lean-body-mass regression `c1 * height² / impedance + c2 * weight + c3 * age + c4`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LbmCoefficients {
    height_index: f64,
    weight: f64,
    age: f64,
    intercept: f64,
}

const LBM_TABLE: [(Gender, bool, LbmCoefficients); 4] = [
    (
        Gender::Male,
        false,
        LbmCoefficients {
            height_index: 0.503,
            weight: 0.165,
            age: -0.158,
            intercept: 17.8,
        },
    ),
    (
        Gender::Male,
        true,
        LbmCoefficients {
            height_index: 0.637,
            weight: 0.205,
            age: -0.180,
            intercept: 12.5,
        },
    ),
    (
        Gender::Female,
        false,
        LbmCoefficients {
            height_index: 0.490,
            weight: 0.150,
            age: -0.130,
            intercept: 11.5,
        },
    ),
    (
        Gender::Female,
        true,
        LbmCoefficients {
            height_index: 0.550,
            weight: 0.180,
            age: -0.150,
            intercept: 8.5,
        },
    ),
];

fn coefficients_for(gender: Gender, athlete: bool) -> LbmCoefficients {
    LBM_TABLE
        .iter()
        .find(|(row_gender, row_athlete, _)| *row_gender == gender && *row_athlete == athlete)
        .map(|(_, _, coefficients)| *coefficients)
        .unwrap_or(LBM_TABLE[0].2)
}

/// Computes the finished payload from a completed reading.
///
/// Source precedence for body fat: vendor-supplied value, then the
/// impedance regression, then a BMI-only estimate when no impedance was
/// ever reported.
///
/// ```
/// use scale_sync::{Gender, Reading, UserProfile, VendorComposition, metrics};
///
/// let profile = UserProfile::builder()
///     .height_cm(180.0)
///     .age_years(30)
///     .gender(Gender::Male)
///     .build();
/// let payload = metrics::compute(
///     &Reading::new(80.0, 500.0),
///     &VendorComposition::default(),
///     &profile,
/// )?;
/// assert_eq!(24.69, payload.bmi);
/// assert!((3.0..=60.0).contains(&payload.body_fat_percent));
/// # Ok::<(), scale_sync::MetricsError>(())
/// ```
///
/// # Errors
///
/// Returns an error when the weight or the profile height is not a positive
/// finite number.
#[instrument(skip_all, level = "debug", fields(weight = reading.weight, impedance = reading.impedance))]
pub fn compute(
    reading: &Reading,
    vendor: &VendorComposition,
    profile: &UserProfile,
) -> Result<BodyComposition, MetricsError> {
    let weight = reading.weight;
    if !reading.has_valid_weight() {
        return Err(MetricsError::InvalidWeight { weight });
    }
    let height_cm = profile.height_cm();
    if !height_cm.is_finite() || height_cm <= 0.0 {
        return Err(MetricsError::InvalidHeight { height_cm });
    }

    let athlete = profile.is_athlete();
    let age = f64::from(profile.age_years());
    let height_m = height_cm / 100.0;
    let bmi = weight / (height_m * height_m);

    let (body_fat_percent, lbm) = match vendor.body_fat_percent {
        Some(fat) if fat.is_finite() && fat > 0.0 => {
            let fat = clamp_fat(fat);
            (fat, weight * (1.0 - fat / 100.0))
        }
        _ if reading.has_impedance() => {
            let lbm = impedance_lbm(weight, reading.impedance, profile);
            (clamp_fat((weight - lbm) / weight * 100.0), lbm)
        }
        _ => {
            let fat = deurenberg_fat(bmi, profile);
            (fat, weight * (1.0 - fat / 100.0))
        }
    };

    let water_coefficient = if athlete { 0.74 } else { 0.73 };
    let muscle_coefficient = if athlete { 0.60 } else { 0.54 };
    let water_percent = vendor
        .water_percent
        .unwrap_or(lbm * water_coefficient / weight * 100.0);
    let bone_mass = vendor.bone_mass.unwrap_or(lbm * BONE_RATIO);
    let muscle_mass = vendor.muscle_mass.unwrap_or(lbm * muscle_coefficient);
    let visceral_fat = match vendor.visceral_fat {
        Some(rating) if rating.is_finite() => {
            clamp_i64(rating.round() as i64, MIN_VISCERAL_FAT, MAX_VISCERAL_FAT)
        }
        _ => visceral_fat_rating(body_fat_percent, age),
    };
    let physique_rating = physique_rating(body_fat_percent, muscle_mass / weight);
    let bmr = bmr(weight, height_cm, profile.age_years(), profile.gender(), athlete);
    let metabolic_age = metabolic_age(weight, height_cm, profile, bmr);

    Ok(BodyComposition {
        weight: round2(weight),
        impedance: round2(reading.impedance.max(0.0)),
        bmi: round2(bmi),
        body_fat_percent: round2(body_fat_percent),
        water_percent: round2(water_percent),
        bone_mass: round2(bone_mass),
        muscle_mass: round2(muscle_mass),
        visceral_fat: to_u32(visceral_fat),
        physique_rating,
        bmr: to_u32(bmr),
        metabolic_age: to_u32(metabolic_age),
    })
}

/// Lean body mass from the impedance regression, capped below body weight.
fn impedance_lbm(weight: f64, impedance: f64, profile: &UserProfile) -> f64 {
    let coefficients = coefficients_for(profile.gender(), profile.is_athlete());
    let height = profile.height_cm();
    let lbm = coefficients.height_index * (height * height / impedance)
        + coefficients.weight * weight
        + coefficients.age * f64::from(profile.age_years())
        + coefficients.intercept;

    if lbm > weight {
        weight * LBM_CAP_RATIO
    } else if lbm <= 0.0 {
        weight * (1.0 - MAX_BODY_FAT_PERCENT / 100.0)
    } else {
        lbm
    }
}

/// BMI-only body-fat estimate used when no impedance is available.
fn deurenberg_fat(bmi: f64, profile: &UserProfile) -> f64 {
    let sex = if profile.is_male() { 1.0 } else { 0.0 };
    clamp_fat(1.2 * bmi + 0.23 * f64::from(profile.age_years()) - 10.8 * sex - 5.4)
}

fn visceral_fat_rating(body_fat_percent: f64, age: f64) -> i64 {
    if body_fat_percent <= 10.0 {
        return MIN_VISCERAL_FAT;
    }
    let raw = (body_fat_percent * 0.55 - 4.0 + age * 0.08).trunc() as i64;
    clamp_i64(raw, MIN_VISCERAL_FAT, MAX_VISCERAL_FAT)
}

fn physique_rating(body_fat_percent: f64, muscle_ratio: f64) -> u32 {
    if body_fat_percent > 25.0 {
        if muscle_ratio >= MID_MUSCLE_RATIO { 2 } else { 1 }
    } else if body_fat_percent < 18.0 {
        if muscle_ratio >= HIGH_MUSCLE_RATIO {
            9
        } else if muscle_ratio >= MID_MUSCLE_RATIO {
            8
        } else {
            7
        }
    } else if muscle_ratio >= HIGH_MUSCLE_RATIO {
        6
    } else if muscle_ratio >= MID_MUSCLE_RATIO {
        5
    } else {
        4
    }
}

/// Mifflin-St Jeor basal metabolic rate, truncated to whole kcal.
fn bmr(weight: f64, height_cm: f64, age_years: u32, gender: Gender, athlete: bool) -> i64 {
    let sex_offset = match gender {
        Gender::Male => 5.0,
        Gender::Female => -161.0,
    };
    let mut value = 10.0 * weight + 6.25 * height_cm - 5.0 * f64::from(age_years) + sex_offset;
    if athlete {
        value *= ATHLETE_BMR_FACTOR;
    }
    value.trunc() as i64
}

fn metabolic_age(weight: f64, height_cm: f64, profile: &UserProfile, bmr_value: i64) -> i64 {
    let age = i64::from(profile.age_years());
    let ideal = bmr(
        weight,
        height_cm,
        IDEAL_BMR_AGE,
        profile.gender(),
        profile.is_athlete(),
    );
    let mut result = age + (ideal - bmr_value) / 15;
    if result < MIN_METABOLIC_AGE {
        result = MIN_METABOLIC_AGE;
    }
    if profile.is_athlete() && result > age {
        result = age - 5;
    }
    result
}

fn clamp_fat(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_BODY_FAT_PERCENT;
    }
    value.clamp(MIN_BODY_FAT_PERCENT, MAX_BODY_FAT_PERCENT)
}

fn clamp_i64(value: i64, min: i64, max: i64) -> i64 {
    value.clamp(min, max)
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Rounds to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
