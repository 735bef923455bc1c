mod backend;
#[cfg(target_os = "linux")]
mod bluez_backend;
mod btleplug_backend;
mod connector;
#[cfg(target_os = "macos")]
mod corebluetooth_backend;
mod fake_backend;
mod options;
mod selector;

pub use self::backend::{BleBackend, Connection, Discovered, ScanResult};
pub use self::connector::{Connector, RawMeasurement, ScaleConnector};
pub use self::fake_backend::{
    CallLog, FakeBackend, FakeBackendConfig, FakeDevice, NotificationScript, ScanFixture,
};
pub use self::options::{RetryPolicy, ScanOptions, SessionTimeouts};
pub use self::selector::{BackendKind, resolve_backend, select_backend};
