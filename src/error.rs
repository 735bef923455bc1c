use std::time::Duration;

use thiserror::Error;

use crate::metrics::MetricsError;

/// Errors returned by scan, connect and measurement sessions.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("BLE operation failed")]
    Btleplug(#[from] btleplug::Error),
    #[cfg(target_os = "linux")]
    #[error("BlueZ operation failed")]
    Bluez(#[from] bluer::Error),
    #[cfg(target_os = "macos")]
    #[error("CoreBluetooth operation failed")]
    CoreBluetooth(#[from] bluest::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("the Bluetooth adapter did not power on within {}", humantime::format_duration(*timeout))]
    AdapterNotPoweredOn { timeout: Duration },
    #[error("no supported scale was discovered within {}", humantime::format_duration(*timeout))]
    DiscoveryTimeout { timeout: Duration },
    #[error("device `{device}` was found but no scale adapter recognized it")]
    DeviceUnrecognized { device: String },
    #[error("failed to connect after {attempts} attempts")]
    ConnectFailure {
        attempts: u32,
        #[source]
        source: Box<ScaleError>,
    },
    #[error("connect attempt timed out after {}", humantime::format_duration(*timeout))]
    ConnectTimeout { timeout: Duration },
    #[error("service discovery did not finish within {}", humantime::format_duration(*timeout))]
    ServiceDiscoveryTimeout { timeout: Duration },
    #[error("required characteristics not found: {uuids}")]
    CharacteristicMissing { uuids: String },
    #[error("the scale disconnected before the measurement completed")]
    UnexpectedDisconnect,
    #[error("the {adapter} handshake failed: {reason}")]
    Handshake {
        adapter: &'static str,
        reason: String,
    },
    #[error("failed to compute body composition")]
    Compute(#[from] MetricsError),
    #[error("the session was aborted")]
    Aborted,
    #[error("another scan session is already in progress")]
    SessionInProgress,
    #[error("the `{backend}` backend is not available on this platform")]
    UnsupportedBackend { backend: String },
    #[error("invalid hardware address `{address}`")]
    InvalidAddress { address: String },
    #[error("fake backend: {reason}")]
    Fake { reason: String },
}

impl ScaleError {
    /// Returns whether this error is the cooperative abort signal.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("scan records must contain `address|name|uuids|rssi` fields")]
    InvalidRecordFieldCount,
    #[error("scan records cannot contain an empty address")]
    EmptyAddress,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("notification fixtures must look like `uuid=hex`, got `{value}`")]
    InvalidNotification { value: String },
    #[error("invalid hex payload `{value}`")]
    InvalidHex {
        value: String,
        #[source]
        source: hex::FromHexError,
    },
}

/// Errors returned when validating CLI options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
    #[error("`read` requires --height, --age and --gender")]
    IncompleteProfile,
    #[error("unknown scale adapter `{name}`; known adapters: {known}")]
    UnknownAdapter { name: String, known: String },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
