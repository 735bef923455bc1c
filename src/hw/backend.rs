use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{BackendKind, RetryPolicy};
use crate::adapters::DeviceInfo;
use crate::error::ScaleError;
use crate::gatt::{GattLink, LinkEvents};
use crate::uuid::CharUuid;

/// One advertising peripheral as seen by a backend.
#[derive(Debug, Clone)]
pub struct Discovered<H> {
    pub handle: H,
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub service_uuids: Vec<CharUuid>,
}

impl<H> Discovered<H> {
    /// Advertisement details for adapter matching.
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(
            self.name.clone().unwrap_or_default(),
            self.service_uuids.iter().map(CharUuid::as_str),
        )
    }

    /// Name for logs and errors, falling back to the address.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} ({})", self.address),
            None => self.address.clone(),
        }
    }

    /// Returns whether this peripheral has the given hardware address.
    #[must_use]
    pub fn has_address(&self, address: &str) -> bool {
        normalize_address(&self.address) == normalize_address(address)
    }
}

/// A device listed by `scan_devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub service_uuids: Vec<CharUuid>,
    /// Adapter that would claim this device, if any.
    pub adapter: Option<&'static str>,
}

/// A connected device with its characteristics enumerated.
pub struct Connection {
    pub link: Box<dyn GattLink>,
    pub events: LinkEvents,
    /// Services found during GATT enumeration.
    pub service_uuids: Vec<CharUuid>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("characteristics", self.link.characteristics())
            .field("service_uuids", &self.service_uuids)
            .finish_non_exhaustive()
    }
}

/// The BLE primitives a platform library has to provide.
///
/// The shared session driver in [`super::Connector`] owns discovery,
/// retries, cancellation and teardown; backends only translate.
#[async_trait]
pub trait BleBackend: Send + Sync + 'static {
    /// Backend-specific peripheral handle.
    type Handle: Clone + Send + Sync + fmt::Debug;

    fn kind(&self) -> BackendKind;

    /// Waits until the local radio reports powered on.
    async fn wait_powered_on(&self) -> Result<(), ScaleError>;

    async fn start_discovery(&self) -> Result<(), ScaleError>;

    async fn stop_discovery(&self) -> Result<(), ScaleError>;

    /// Lists the peripherals currently visible.
    async fn visible_devices(&self) -> Result<Vec<Discovered<Self::Handle>>, ScaleError>;

    /// Makes one connection attempt.
    async fn connect(&self, handle: &Self::Handle) -> Result<(), ScaleError>;

    async fn disconnect(&self, handle: &Self::Handle) -> Result<(), ScaleError>;

    /// Enumerates services and characteristics and opens the notification
    /// stream.
    async fn open_link(&self, handle: &Self::Handle) -> Result<Connection, ScaleError>;

    /// Backend-specific recovery after `failures` consecutive failed connect
    /// attempts. Runs before the retry delay.
    async fn recover(
        &self,
        handle: &Self::Handle,
        failures: u32,
        policy: &RetryPolicy,
    ) -> Result<(), ScaleError> {
        let _ = (handle, failures, policy);
        Ok(())
    }

    /// Delay between stopping discovery and the first connect attempt.
    fn settle_delay(&self, configured: Duration) -> Duration {
        configured
    }
}

/// Upper-cases a colon-separated hardware address and drops separators.
pub(crate) fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Checks that `address` is a 48-bit hardware address or, as CoreBluetooth
/// reports peripherals, a 128-bit identifier.
pub(crate) fn validate_address(address: &str) -> Result<(), ScaleError> {
    let digits = normalize_address(address);
    if matches!(digits.len(), 12 | 32) && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ScaleError::InvalidAddress {
            address: address.to_string(),
        })
    }
}
