use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace};

use super::{BackendKind, BleBackend, Connection, Discovered, RetryPolicy};
use crate::error::ScaleError;
use crate::gatt::{Capabilities, CharacteristicMap, GattLink, LinkEvent, WriteMode};
use crate::uuid::CharUuid;

const POWER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Backend over the cross-platform `btleplug` crate.
#[derive(Debug)]
pub(crate) struct BtleplugBackend {
    adapter: Adapter,
}

impl BtleplugBackend {
    /// Opens the first local Bluetooth adapter.
    pub(crate) async fn new() -> Result<Self, ScaleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(ScaleError::NoAdapters)?;
        debug!(adapter = %adapter.adapter_info().await?, "using btleplug adapter");
        Ok(Self { adapter })
    }
}

#[async_trait]
impl BleBackend for BtleplugBackend {
    type Handle = Peripheral;

    fn kind(&self) -> BackendKind {
        BackendKind::Btleplug
    }

    #[instrument(skip(self), level = "debug")]
    async fn wait_powered_on(&self) -> Result<(), ScaleError> {
        loop {
            match self.adapter.adapter_state().await? {
                CentralState::PoweredOff => {
                    trace!("adapter powered off; waiting");
                    sleep(POWER_POLL_INTERVAL).await;
                }
                state => {
                    debug!(?state, "adapter ready");
                    return Ok(());
                }
            }
        }
    }

    async fn start_discovery(&self) -> Result<(), ScaleError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), ScaleError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn visible_devices(&self) -> Result<Vec<Discovered<Peripheral>>, ScaleError> {
        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            let address = address_of(&peripheral, &properties);
            devices.push(Discovered {
                handle: peripheral,
                address,
                name: properties.local_name,
                rssi: properties.rssi,
                service_uuids: properties.services.into_iter().map(CharUuid::from).collect(),
            });
        }
        Ok(devices)
    }

    #[instrument(skip_all, level = "debug", fields(id = %handle.id()))]
    async fn connect(&self, handle: &Peripheral) -> Result<(), ScaleError> {
        if !handle.is_connected().await? {
            handle.connect().await?;
        }
        Ok(())
    }

    async fn disconnect(&self, handle: &Peripheral) -> Result<(), ScaleError> {
        if handle.is_connected().await? {
            handle.disconnect().await?;
        }
        Ok(())
    }

    #[instrument(skip_all, level = "debug", fields(id = %handle.id()))]
    async fn open_link(&self, handle: &Peripheral) -> Result<Connection, ScaleError> {
        handle.discover_services().await?;

        let mut map = CharacteristicMap::new();
        let mut characteristics = HashMap::new();
        let mut service_uuids = Vec::new();
        for service in handle.services() {
            service_uuids.push(CharUuid::from(service.uuid));
            for characteristic in service.characteristics {
                let uuid = CharUuid::from(characteristic.uuid);
                map.insert(uuid.clone(), capabilities(characteristic.properties));
                characteristics.entry(uuid).or_insert(characteristic);
            }
        }

        let (sender, events) = mpsc::unbounded_channel();
        let notifications = handle.notifications().await?;
        let central_events = self.adapter.events().await?;
        let tasks = vec![
            tokio::spawn(forward_notifications(notifications, sender.clone())),
            tokio::spawn(watch_disconnect(central_events, handle.id(), sender)),
        ];

        Ok(Connection {
            link: Box::new(BtleplugLink {
                peripheral: handle.clone(),
                map,
                characteristics,
                tasks,
            }),
            events,
            service_uuids,
        })
    }

    async fn recover(
        &self,
        _handle: &Peripheral,
        failures: u32,
        policy: &RetryPolicy,
    ) -> Result<(), ScaleError> {
        if failures < policy.restart_scan_after {
            return Ok(());
        }
        info!(failures, "restarting scan cycle to reset radio state");
        self.adapter.start_scan(ScanFilter::default()).await?;
        sleep(policy.quiesce).await;
        self.adapter.stop_scan().await?;
        Ok(())
    }
}

async fn forward_notifications(
    mut notifications: std::pin::Pin<
        Box<dyn tokio_stream::Stream<Item = btleplug::api::ValueNotification> + Send>,
    >,
    sender: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(notification) = notifications.next().await {
        let event = LinkEvent::Notification {
            source: CharUuid::from(notification.uuid),
            value: notification.value,
        };
        if sender.send(event).is_err() {
            return;
        }
    }
    let _ = sender.send(LinkEvent::Disconnected);
}

async fn watch_disconnect(
    mut events: std::pin::Pin<Box<dyn tokio_stream::Stream<Item = CentralEvent> + Send>>,
    id: btleplug::platform::PeripheralId,
    sender: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(disconnected) = event
            && disconnected == id
        {
            let _ = sender.send(LinkEvent::Disconnected);
            return;
        }
    }
}

/// Connected peripheral plus the tasks feeding its event stream.
#[derive(Debug)]
struct BtleplugLink {
    peripheral: Peripheral,
    map: CharacteristicMap,
    characteristics: HashMap<CharUuid, Characteristic>,
    tasks: Vec<JoinHandle<()>>,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: &CharUuid) -> Result<&Characteristic, ScaleError> {
        self.characteristics
            .get(uuid)
            .ok_or_else(|| ScaleError::CharacteristicMissing {
                uuids: uuid.to_string(),
            })
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    fn characteristics(&self) -> &CharacteristicMap {
        &self.map
    }

    #[instrument(skip_all, level = "trace", fields(%uuid))]
    async fn subscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral.subscribe(characteristic).await?;
        Ok(())
    }

    async fn unsubscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral.unsubscribe(characteristic).await?;
        Ok(())
    }

    #[instrument(skip_all, level = "trace", fields(%uuid, %mode, payload_len = payload.len()))]
    async fn write(
        &self,
        uuid: &CharUuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), ScaleError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral
            .write(characteristic, payload, write_type(mode))
            .await?;
        Ok(())
    }

    async fn read(&self, uuid: &CharUuid) -> Result<Vec<u8>, ScaleError> {
        let characteristic = self.characteristic(uuid)?;
        Ok(self.peripheral.read(characteristic).await?)
    }
}

fn capabilities(flags: CharPropFlags) -> Capabilities {
    Capabilities {
        subscribe: flags.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        read: flags.contains(CharPropFlags::READ),
    }
}

fn write_type(mode: WriteMode) -> WriteType {
    match mode {
        WriteMode::WithResponse => WriteType::WithResponse,
        WriteMode::WithoutResponse => WriteType::WithoutResponse,
    }
}

/// CoreBluetooth hides hardware addresses; fall back to the peripheral id.
fn address_of(peripheral: &Peripheral, properties: &PeripheralProperties) -> String {
    if properties.address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        properties.address.to_string()
    }
}
