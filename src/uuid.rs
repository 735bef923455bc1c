use std::fmt;

use serde_with::SerializeDisplay;

/// Lower-case, dash-free tail of the Bluetooth SIG base UUID
/// (`0000xxxx-0000-1000-8000-00805f9b34fb`).
const SIG_BASE_SUFFIX: &str = "00001000800000805f9b34fb";

/// Normalizes a BLE UUID into one comparable form.
///
/// Dashes, braces and whitespace are stripped, hex digits are lower-cased and
/// 16-bit (`"2a9d"`) or 32-bit short forms are expanded onto the Bluetooth
/// SIG base UUID. Input that is neither a short nor a full UUID is returned
/// in its cleaned form so comparisons stay total.
///
/// ```
/// use scale_sync::uuid::normalize;
///
/// assert_eq!(
///     normalize("FFF1"),
///     normalize("0000fff1-0000-1000-8000-00805f9b34fb"),
/// );
/// assert_eq!("0000fff100001000800000805f9b34fb", normalize("0xFFF1"));
/// ```
#[must_use]
pub fn normalize(uuid: &str) -> String {
    let cleaned: String = uuid
        .chars()
        .filter(|c| !matches!(c, '-' | '{' | '}') && !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let cleaned = cleaned.trim_start_matches("0x");

    match cleaned.len() {
        4 => format!("0000{cleaned}{SIG_BASE_SUFFIX}"),
        8 => format!("{cleaned}{SIG_BASE_SUFFIX}"),
        _ => cleaned.to_owned(),
    }
}

/// Returns whether two UUIDs name the same characteristic.
#[must_use]
pub fn same_uuid(left: &str, right: &str) -> bool {
    normalize(left) == normalize(right)
}

/// A characteristic or service UUID held in normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay)]
pub struct CharUuid(String);

impl CharUuid {
    /// Normalizes and wraps a UUID string.
    #[must_use]
    pub fn new(uuid: &str) -> Self {
        Self(normalize(uuid))
    }

    /// Expands a 16-bit SIG-assigned number.
    #[must_use]
    pub fn from_u16(short: u16) -> Self {
        Self(format!("0000{short:04x}{SIG_BASE_SUFFIX}"))
    }

    /// Returns the normalized string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 16-bit short form when this UUID sits on the SIG base.
    #[must_use]
    pub fn short_form(&self) -> Option<u16> {
        if self.0.len() != 32 || !self.0.starts_with("0000") || !self.0.ends_with(SIG_BASE_SUFFIX)
        {
            return None;
        }
        u16::from_str_radix(&self.0[4..8], 16).ok()
    }

    /// Returns whether this UUID equals another UUID string once normalized.
    #[must_use]
    pub fn matches(&self, other: &str) -> bool {
        self.0 == normalize(other)
    }
}

impl fmt::Display for CharUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.short_form() {
            Some(short) => write!(f, "{short:04x}"),
            None => f.write_str(&self.0),
        }
    }
}

impl From<&str> for CharUuid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<::uuid::Uuid> for CharUuid {
    fn from(value: ::uuid::Uuid) -> Self {
        Self(value.simple().to_string())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("FFF1")]
    #[case("0000fff1-0000-1000-8000-00805f9b34fb")]
    #[case("0000FFF1-0000-1000-8000-00805F9B34FB")]
    #[case("0xfff1")]
    #[case(" {0000fff1-0000-1000-8000-00805f9b34fb} ")]
    #[case("{0xFFF1}")]
    fn normalize_collapses_equivalent_forms(#[case] input: &str) {
        assert_eq!("0000fff100001000800000805f9b34fb", normalize(input));
    }

    #[rstest]
    #[case("2A9D")]
    #[case("352e3001-28e9-40b8-a361-6db4cca4147c")]
    #[case("not-a-uuid")]
    #[case("")]
    #[case("{0xffe1}")]
    #[case(" 0X FF E1 ")]
    #[case("0x0xffe1")]
    fn normalize_is_idempotent(#[case] input: &str) {
        let once = normalize(input);
        assert_eq!(once, normalize(&once));
    }

    #[test]
    fn normalize_keeps_vendor_uuids_in_full() {
        assert_eq!(
            "352e300128e940b8a3616db4cca4147c",
            normalize("352E3001-28E9-40B8-A361-6DB4CCA4147C")
        );
    }

    #[test]
    fn char_uuid_reports_short_form_only_on_sig_base() {
        assert_eq!(Some(0x2a9c), CharUuid::from_u16(0x2A9C).short_form());
        assert_eq!(
            None,
            CharUuid::new("352e3001-28e9-40b8-a361-6db4cca4147c").short_form()
        );
    }

    #[test]
    fn char_uuid_from_uuid_crate_matches_string_form() {
        let parsed = ::uuid::Uuid::parse_str("0000ffe1-0000-1000-8000-00805f9b34fb")
            .expect("test uuid should parse");
        assert_eq!(CharUuid::new("ffe1"), CharUuid::from(parsed));
    }

    #[test]
    fn same_uuid_ignores_case_and_form() {
        assert!(same_uuid("FFE1", "0000ffe1-0000-1000-8000-00805f9b34fb"));
        assert!(!same_uuid("ffe1", "ffe3"));
    }

    #[test]
    fn char_uuid_displays_short_form() {
        assert_eq!("2a9d", CharUuid::new("2A9D").to_string());
    }
}
