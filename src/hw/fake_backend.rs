use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::{BackendKind, BleBackend, Connection, Discovered, RetryPolicy};
use crate::error::{FixtureError, ScaleError};
use crate::gatt::{Capabilities, CharacteristicMap, GattLink, LinkEvent, WriteMode};
use crate::uuid::CharUuid;
use crate::utils::format_hex;

/// One advertising device parsed from a scan fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDevice {
    pub address: String,
    pub name: Option<String>,
    pub service_uuids: Vec<CharUuid>,
    pub rssi: Option<i16>,
}

/// Devices the fake radio advertises, parsed from
/// `address|name|uuids|rssi;...` records. `-` leaves a field empty and
/// uuids are separated by commas or spaces.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<FakeDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }
        let devices = value
            .split(';')
            .filter(|record| !record.trim().is_empty())
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { devices })
    }
}

fn parse_scan_record(record: &str) -> Result<FakeDevice, FixtureError> {
    let fields: Vec<&str> = record.split('|').map(str::trim).collect();
    let [address, name, uuids, rssi] = fields[..] else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if address.is_empty() {
        return Err(FixtureError::EmptyAddress);
    }

    let name = (!name.is_empty() && name != "-").then(|| name.to_string());
    let service_uuids = uuids
        .split([',', ' '])
        .map(str::trim)
        .filter(|uuid| !uuid.is_empty() && *uuid != "-")
        .map(CharUuid::new)
        .collect();
    let rssi = match rssi {
        "" | "-" => None,
        rssi => Some(rssi.parse::<i16>()?),
    };

    Ok(FakeDevice {
        address: address.to_string(),
        name,
        service_uuids,
        rssi,
    })
}

/// Notifications the fake scale pushes once subscribed, parsed from
/// `uuid=hex,...` in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationScript {
    frames: Vec<(CharUuid, Vec<u8>)>,
}

impl NotificationScript {
    /// Characteristics the script sends notifications from.
    pub fn sources(&self) -> impl Iterator<Item = &CharUuid> {
        self.frames.iter().map(|(source, _)| source)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FromStr for NotificationScript {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let frames = value
            .split(',')
            .map(str::trim)
            .filter(|frame| !frame.is_empty())
            .map(parse_frame)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { frames })
    }
}

fn parse_frame(frame: &str) -> Result<(CharUuid, Vec<u8>), FixtureError> {
    let Some((uuid, payload)) = frame.split_once('=') else {
        return Err(FixtureError::InvalidNotification {
            value: frame.to_string(),
        });
    };
    let uuid = uuid.trim();
    if uuid.is_empty() {
        return Err(FixtureError::InvalidNotification {
            value: frame.to_string(),
        });
    }
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let payload = hex::decode(&cleaned).map_err(|source| FixtureError::InvalidHex {
        value: cleaned.clone(),
        source,
    })?;
    Ok((CharUuid::new(uuid), payload))
}

/// Shared record of every call the fake backend received.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn record(&self, call: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.into());
    }

    /// Every call so far, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of calls whose entry starts with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

/// Settings for a fake backend.
#[derive(Debug, Builder)]
pub struct FakeBackendConfig {
    scan: ScanFixture,
    #[builder(default)]
    notifications: NotificationScript,
    /// Extra characteristics exposed as writable, e.g. a legacy unlock target.
    #[builder(default)]
    writable: Vec<CharUuid>,
    /// Number of connect attempts that fail before one succeeds.
    #[builder(default)]
    connect_failures: u32,
    /// Connect attempts never resolve, like a peripheral that stopped answering.
    #[builder(default)]
    connect_hangs: bool,
    /// Devices become visible this long after discovery starts.
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default = true)]
    powered: bool,
    /// Hangs up once the notification script is exhausted.
    #[builder(default = true)]
    disconnect_after_script: bool,
}

/// Fixture-driven backend used in tests and non-hardware environments.
#[derive(Debug)]
pub struct FakeBackend {
    config: FakeBackendConfig,
    calls: CallLog,
    connect_attempts: AtomicU32,
    discovery_started: Mutex<Option<Instant>>,
}

impl FakeBackend {
    #[must_use]
    pub fn new(config: FakeBackendConfig) -> Self {
        Self {
            config,
            calls: CallLog::default(),
            connect_attempts: AtomicU32::new(0),
            discovery_started: Mutex::new(None),
        }
    }

    /// Handle onto the call log, usable after the backend moved into a
    /// connector.
    #[must_use]
    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    fn discovery_started(&self) -> Option<Instant> {
        *self
            .discovery_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_discovery_started(&self, started: Option<Instant>) {
        *self
            .discovery_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = started;
    }

    fn characteristic_map(&self) -> CharacteristicMap {
        let mut map: CharacteristicMap = self
            .config
            .notifications
            .sources()
            .map(|source| (source.clone(), Capabilities::notify()))
            .collect();
        for uuid in &self.config.writable {
            map.insert(uuid.clone(), Capabilities::writable());
        }
        map
    }
}

#[async_trait]
impl BleBackend for FakeBackend {
    type Handle = String;

    fn kind(&self) -> BackendKind {
        BackendKind::Fake
    }

    async fn wait_powered_on(&self) -> Result<(), ScaleError> {
        if !self.config.powered {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), ScaleError> {
        self.calls.record("start_discovery");
        self.set_discovery_started(Some(Instant::now()));
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), ScaleError> {
        self.calls.record("stop_discovery");
        self.set_discovery_started(None);
        Ok(())
    }

    async fn visible_devices(&self) -> Result<Vec<Discovered<String>>, ScaleError> {
        let visible = self
            .discovery_started()
            .is_some_and(|started| started.elapsed() >= self.config.discovery_delay);
        if !visible {
            return Ok(Vec::new());
        }
        Ok(self
            .config
            .scan
            .devices
            .iter()
            .map(|device| Discovered {
                handle: device.address.clone(),
                address: device.address.clone(),
                name: device.name.clone(),
                rssi: device.rssi,
                service_uuids: device.service_uuids.clone(),
            })
            .collect())
    }

    async fn connect(&self, handle: &String) -> Result<(), ScaleError> {
        self.calls.record(format!("connect {handle}"));
        if self.config.connect_hangs {
            return std::future::pending().await;
        }
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.config.connect_failures {
            debug!(attempt, "forcing fake connect failure");
            return Err(ScaleError::Fake {
                reason: format!("forced connect failure {attempt}"),
            });
        }
        Ok(())
    }

    async fn disconnect(&self, handle: &String) -> Result<(), ScaleError> {
        self.calls.record(format!("disconnect {handle}"));
        Ok(())
    }

    async fn open_link(&self, handle: &String) -> Result<Connection, ScaleError> {
        let service_uuids = self
            .config
            .scan
            .devices
            .iter()
            .find(|device| &device.address == handle)
            .map(|device| device.service_uuids.clone())
            .unwrap_or_default();
        let (sender, events) = mpsc::unbounded_channel();
        let link = FakeLink {
            map: self.characteristic_map(),
            calls: self.calls.clone(),
            state: Mutex::new(ScriptState {
                pending: self.config.notifications.frames.clone(),
                next: 0,
                subscribed: Vec::new(),
                sender,
                disconnect_after_script: self.config.disconnect_after_script,
            }),
        };
        Ok(Connection {
            link: Box::new(link),
            events,
            service_uuids,
        })
    }

    async fn recover(
        &self,
        _handle: &String,
        failures: u32,
        _policy: &RetryPolicy,
    ) -> Result<(), ScaleError> {
        self.calls.record(format!("recover {failures}"));
        Ok(())
    }
}

#[derive(Debug)]
struct ScriptState {
    pending: Vec<(CharUuid, Vec<u8>)>,
    next: usize,
    subscribed: Vec<CharUuid>,
    sender: mpsc::UnboundedSender<LinkEvent>,
    disconnect_after_script: bool,
}

impl ScriptState {
    /// Delivers script frames in order while their source is subscribed.
    fn pump(&mut self) {
        while let Some((source, value)) = self.pending.get(self.next) {
            if !self.subscribed.contains(source) {
                return;
            }
            let _ = self.sender.send(LinkEvent::Notification {
                source: source.clone(),
                value: value.clone(),
            });
            self.next += 1;
        }
        if self.disconnect_after_script && !self.pending.is_empty() {
            let _ = self.sender.send(LinkEvent::Disconnected);
            self.pending.clear();
            self.next = 0;
        }
    }
}

#[derive(Debug)]
struct FakeLink {
    map: CharacteristicMap,
    calls: CallLog,
    state: Mutex<ScriptState>,
}

impl FakeLink {
    fn require(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
        if self.map.contains(uuid.as_str()) {
            Ok(())
        } else {
            Err(ScaleError::CharacteristicMissing {
                uuids: uuid.to_string(),
            })
        }
    }
}

#[async_trait]
impl GattLink for FakeLink {
    fn characteristics(&self) -> &CharacteristicMap {
        &self.map
    }

    async fn subscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
        self.calls.record(format!("subscribe {uuid}"));
        self.require(uuid)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribed.push(uuid.clone());
        state.pump();
        Ok(())
    }

    async fn unsubscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
        self.calls.record(format!("unsubscribe {uuid}"));
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribed.retain(|subscribed| subscribed != uuid);
        Ok(())
    }

    async fn write(
        &self,
        uuid: &CharUuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), ScaleError> {
        self.calls
            .record(format!("write {uuid} {} {mode}", format_hex(payload)));
        self.require(uuid)
    }

    async fn read(&self, uuid: &CharUuid) -> Result<Vec<u8>, ScaleError> {
        self.calls.record(format!("read {uuid}"));
        self.require(uuid)?;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("AA:BB:CC:DD:EE:FF|QN-Scale|ffe0|-61", 1)]
    #[case("AA:BB|QN-Scale|ffe0,fff0|-61;CC:DD|-|-|-", 2)]
    #[case("AA:BB|MI SCALE2|181d 181b|-70;", 1)]
    fn parses_scan_records(#[case] fixture: &str, #[case] expected: usize) {
        let fixture: ScanFixture = fixture.parse().expect("fixture should parse");
        let devices: Vec<FakeDevice> = fixture.into();
        assert_eq!(expected, devices.len());
    }

    #[test]
    fn scan_record_fields_are_normalized() {
        let fixture: ScanFixture = "AA:BB|MI SCALE2|181D, 0000181b-0000-1000-8000-00805f9b34fb|-70"
            .parse()
            .expect("fixture should parse");
        let devices: Vec<FakeDevice> = fixture.into();
        assert_eq!(
            FakeDevice {
                address: "AA:BB".to_string(),
                name: Some("MI SCALE2".to_string()),
                service_uuids: vec![CharUuid::new("181d"), CharUuid::new("181b")],
                rssi: Some(-70),
            },
            devices[0]
        );
    }

    #[rstest]
    #[case("", "empty")]
    #[case("AA:BB|QN|ffe0", "fields")]
    #[case("|QN|ffe0|-61", "address")]
    #[case("AA:BB|QN|ffe0|loud", "rssi")]
    fn rejects_malformed_scan_fixtures(#[case] fixture: &str, #[case] problem: &str) {
        let result = fixture.parse::<ScanFixture>();
        match problem {
            "empty" => assert_matches!(result, Err(FixtureError::EmptyFixture)),
            "fields" => assert_matches!(result, Err(FixtureError::InvalidRecordFieldCount)),
            "address" => assert_matches!(result, Err(FixtureError::EmptyAddress)),
            _ => assert_matches!(result, Err(FixtureError::InvalidRssi(_))),
        }
    }

    #[test]
    fn parses_notification_script_in_order() {
        let script: NotificationScript = "ffe1=100A011F400102260212, 2a9d=00983A"
            .parse()
            .expect("script should parse");
        assert_eq!(2, script.len());
        assert_eq!(
            vec![CharUuid::new("ffe1"), CharUuid::new("2a9d")],
            script.sources().cloned().collect::<Vec<_>>()
        );
    }

    #[rstest]
    #[case("ffe1:0011")]
    #[case("=0011")]
    fn rejects_frames_without_source(#[case] script: &str) {
        assert_matches!(
            script.parse::<NotificationScript>(),
            Err(FixtureError::InvalidNotification { .. })
        );
    }

    #[test]
    fn rejects_bad_hex_payloads() {
        assert_matches!(
            "ffe1=0G".parse::<NotificationScript>(),
            Err(FixtureError::InvalidHex { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn devices_appear_after_discovery_delay() {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .scan("AA:BB|QN|ffe0|-61".parse().expect("fixture should parse"))
                .discovery_delay(Duration::from_secs(2))
                .build(),
        );
        backend.start_discovery().await.expect("discovery should start");
        assert!(backend.visible_devices().await.expect("listing").is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(1, backend.visible_devices().await.expect("listing").len());
    }

    #[tokio::test]
    async fn forced_failures_precede_success() {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .scan("AA:BB|QN|ffe0|-61".parse().expect("fixture should parse"))
                .connect_failures(1)
                .build(),
        );
        let handle = "AA:BB".to_string();
        assert_matches!(backend.connect(&handle).await, Err(ScaleError::Fake { .. }));
        assert_matches!(backend.connect(&handle).await, Ok(()));
        assert_eq!(2, backend.calls().count("connect "));
    }

    #[tokio::test]
    async fn link_delivers_frames_once_their_source_is_subscribed() {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .scan("AA:BB|SBF72|181d,181b|-61".parse().expect("fixture should parse"))
                .notifications("2a9d=01,2a9c=02".parse().expect("script should parse"))
                .build(),
        );
        let Connection {
            link, mut events, ..
        } = backend
            .open_link(&"AA:BB".to_string())
            .await
            .expect("link should open");

        link.subscribe(&CharUuid::new("2a9c")).await.expect("subscribe");
        assert!(events.try_recv().is_err());

        link.subscribe(&CharUuid::new("2a9d")).await.expect("subscribe");
        assert_matches!(
            events.try_recv(),
            Ok(LinkEvent::Notification { value, .. }) if value == vec![0x01]
        );
        assert_matches!(
            events.try_recv(),
            Ok(LinkEvent::Notification { value, .. }) if value == vec![0x02]
        );
        assert_matches!(events.try_recv(), Ok(LinkEvent::Disconnected));
    }
}
