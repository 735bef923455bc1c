use serde::Serialize;
use strum_macros::{Display, EnumString};
use tracing::info;

use super::{Connector, ScaleConnector};
use crate::error::ScaleError;

/// BLE library used to reach the scale.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Eq,
    PartialEq,
    Hash,
    Display,
    EnumString,
    Serialize,
    clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Pick the native backend for the running OS.
    #[default]
    Auto,
    /// Cross-platform `btleplug`.
    Btleplug,
    /// BlueZ over D-Bus (Linux).
    Bluez,
    /// CoreBluetooth (macOS).
    Corebluetooth,
    /// Fixture-driven fake backend.
    #[value(skip)]
    Fake,
}

/// Resolves `requested` to a concrete backend for `os` (a
/// `std::env::consts::OS` value).
///
/// # Errors
///
/// Returns [`ScaleError::UnsupportedBackend`] when the backend does not exist
/// on that OS.
pub fn resolve_backend(requested: BackendKind, os: &str) -> Result<BackendKind, ScaleError> {
    let resolved = match (requested, os) {
        (BackendKind::Auto, "linux") => BackendKind::Bluez,
        (BackendKind::Auto, "macos") => BackendKind::Corebluetooth,
        (BackendKind::Auto, _) => BackendKind::Btleplug,
        (BackendKind::Bluez, "linux") | (BackendKind::Corebluetooth, "macos") => requested,
        (BackendKind::Btleplug | BackendKind::Fake, _) => requested,
        (BackendKind::Bluez | BackendKind::Corebluetooth, _) => {
            return Err(ScaleError::UnsupportedBackend {
                backend: requested.to_string(),
            });
        }
    };
    Ok(resolved)
}

/// Builds the connector for `requested` on the running OS. Only the chosen
/// backend is initialised.
///
/// # Errors
///
/// Returns an error when the backend is unsupported here or its library
/// fails to initialise.
pub async fn select_backend(
    requested: BackendKind,
) -> Result<Box<dyn ScaleConnector>, ScaleError> {
    let kind = resolve_backend(requested, std::env::consts::OS)?;
    info!(%requested, %kind, "selected BLE backend");
    match kind {
        BackendKind::Btleplug => Ok(Box::new(Connector::new(
            super::btleplug_backend::BtleplugBackend::new().await?,
        ))),
        #[cfg(target_os = "linux")]
        BackendKind::Bluez => Ok(Box::new(Connector::new(
            super::bluez_backend::BluezBackend::new().await?,
        ))),
        #[cfg(target_os = "macos")]
        BackendKind::Corebluetooth => Ok(Box::new(Connector::new(
            super::corebluetooth_backend::CoreBluetoothBackend::new().await?,
        ))),
        _ => Err(ScaleError::UnsupportedBackend {
            backend: kind.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(BackendKind::Auto, "linux", BackendKind::Bluez)]
    #[case(BackendKind::Auto, "macos", BackendKind::Corebluetooth)]
    #[case(BackendKind::Auto, "windows", BackendKind::Btleplug)]
    #[case(BackendKind::Btleplug, "linux", BackendKind::Btleplug)]
    #[case(BackendKind::Bluez, "linux", BackendKind::Bluez)]
    #[case(BackendKind::Corebluetooth, "macos", BackendKind::Corebluetooth)]
    fn resolves_backend_per_os(
        #[case] requested: BackendKind,
        #[case] os: &str,
        #[case] expected: BackendKind,
    ) {
        assert_eq!(expected, resolve_backend(requested, os).expect("backend should resolve"));
    }

    #[rstest]
    #[case(BackendKind::Bluez, "macos")]
    #[case(BackendKind::Corebluetooth, "linux")]
    #[case(BackendKind::Bluez, "windows")]
    fn rejects_foreign_backends(#[case] requested: BackendKind, #[case] os: &str) {
        assert_matches!(
            resolve_backend(requested, os),
            Err(ScaleError::UnsupportedBackend { .. })
        );
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(Ok(BackendKind::Bluez), "BlueZ".parse::<BackendKind>());
    }
}
