pub mod adapters;
mod app;
mod cli;
mod error;
mod gatt;
mod hw;
mod measurement;
pub mod metrics;
mod telemetry;
mod terminal;
mod utils;
pub mod uuid;

pub use adapters::{AdapterRegistry, DeviceInfo, ScaleAdapter};
pub use app::{
    Measurement, MeasurementHandler, fake_connector, real_connector, run, run_with_clients,
    run_with_log_level,
};
pub use cli::{Args, Command, FakeArgs, LogLevel, OutputFormat, ReadArgs, ScanArgs};
pub use error::{FixtureError, ScaleError};
pub use gatt::{Capabilities, CharacteristicMap, GattLink, LinkEvent, LiveDataCallback, WriteMode};
pub use hw::{
    BackendKind, BleBackend, CallLog, Connection, Connector, Discovered, FakeBackend,
    FakeBackendConfig, FakeDevice, NotificationScript, RawMeasurement, RetryPolicy,
    ScaleConnector, ScanFixture, ScanOptions, ScanResult, SessionTimeouts, resolve_backend,
    select_backend,
};
pub use measurement::{
    BodyComposition, Gender, KG_PER_LB, Reading, UserProfile, VendorComposition, WeightUnit,
};
pub use metrics::MetricsError;
pub use terminal::{SystemTerminalClient, TerminalClient};
pub use uuid::CharUuid;
