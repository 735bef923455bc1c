use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::WriteOp;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::{Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, Session};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, instrument, trace, warn};

use super::{BackendKind, BleBackend, Connection, Discovered, RetryPolicy};
use crate::error::ScaleError;
use crate::gatt::{Capabilities, CharacteristicMap, GattLink, LinkEvent, WriteMode};
use crate::uuid::CharUuid;

const POWER_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);
const REDISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const POWER_CYCLE_PAUSE: Duration = Duration::from_secs(1);

/// Backend talking to BlueZ over D-Bus via `bluer`.
#[derive(Debug)]
pub(crate) struct BluezBackend {
    adapter: Adapter,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezBackend {
    /// Connects to bluetoothd and opens the default adapter.
    pub(crate) async fn new() -> Result<Self, ScaleError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        debug!(adapter = adapter.name(), "using BlueZ adapter");
        Ok(Self {
            adapter,
            discovery: Mutex::new(None),
        })
    }

    /// Runs a short discovery until BlueZ knows `address` again.
    #[instrument(skip(self), level = "debug", fields(%address))]
    async fn rediscover(&self, address: Address) -> Result<(), ScaleError> {
        let mut events = Box::pin(self.adapter.discover_devices().await?);
        let found = timeout(REDISCOVERY_TIMEOUT, async {
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(added) = event
                    && added == address
                {
                    return true;
                }
            }
            false
        })
        .await;
        match found {
            Ok(true) => debug!("device rediscovered"),
            Ok(false) | Err(_) => warn!("device did not reappear during rediscovery"),
        }
        Ok(())
    }

    async fn power_cycle(&self) -> Result<(), ScaleError> {
        warn!("power-cycling the Bluetooth adapter");
        self.adapter.set_powered(false).await?;
        sleep(POWER_CYCLE_PAUSE).await;
        self.adapter.set_powered(true).await?;
        self.wait_powered_on().await
    }
}

#[async_trait]
impl BleBackend for BluezBackend {
    type Handle = Address;

    fn kind(&self) -> BackendKind {
        BackendKind::Bluez
    }

    #[instrument(skip(self), level = "debug")]
    async fn wait_powered_on(&self) -> Result<(), ScaleError> {
        if !self.adapter.is_powered().await?
            && let Err(error) = self.adapter.set_powered(true).await
        {
            debug!(?error, "could not power on adapter; waiting for it");
        }
        while !self.adapter.is_powered().await? {
            trace!("adapter powered off; waiting");
            sleep(POWER_POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), ScaleError> {
        let events = self.adapter.discover_devices().await?;
        // Discovery stays active while the event stream is alive.
        let drain = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while events.next().await.is_some() {}
        });
        if let Some(previous) = self.discovery.lock().await.replace(drain) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), ScaleError> {
        if let Some(drain) = self.discovery.lock().await.take() {
            drain.abort();
        }
        Ok(())
    }

    async fn visible_devices(&self) -> Result<Vec<Discovered<Address>>, ScaleError> {
        let mut devices = Vec::new();
        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            let service_uuids = device
                .uuids()
                .await?
                .unwrap_or_default()
                .into_iter()
                .map(CharUuid::from)
                .collect();
            devices.push(Discovered {
                handle: address,
                address: address.to_string(),
                name: device.name().await?,
                rssi: device.rssi().await?,
                service_uuids,
            });
        }
        Ok(devices)
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, handle: &Address) -> Result<(), ScaleError> {
        let device = self.adapter.device(*handle)?;
        if !device.is_connected().await? {
            device.connect().await?;
        }
        Ok(())
    }

    async fn disconnect(&self, handle: &Address) -> Result<(), ScaleError> {
        let device = self.adapter.device(*handle)?;
        if device.is_connected().await? {
            device.disconnect().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn open_link(&self, handle: &Address) -> Result<Connection, ScaleError> {
        let device = self.adapter.device(*handle)?;
        while !device.is_services_resolved().await? {
            sleep(SERVICES_POLL_INTERVAL).await;
        }

        let mut map = CharacteristicMap::new();
        let mut characteristics = HashMap::new();
        let mut service_uuids = Vec::new();
        for service in device.services().await? {
            let enumerated = async {
                let uuid = service.uuid().await?;
                let characteristics = service.characteristics().await?;
                Ok::<_, bluer::Error>((uuid, characteristics))
            };
            let (uuid, service_characteristics) = match enumerated.await {
                Ok(enumerated) => enumerated,
                Err(error) => {
                    warn!(?error, service = service.id(), "skipping service that failed to enumerate");
                    continue;
                }
            };
            service_uuids.push(CharUuid::from(uuid));
            for characteristic in service_characteristics {
                let (uuid, flags) = match (characteristic.uuid().await, characteristic.flags().await) {
                    (Ok(uuid), Ok(flags)) => (uuid, flags),
                    (Err(error), _) | (_, Err(error)) => {
                        debug!(?error, "skipping characteristic that failed to enumerate");
                        continue;
                    }
                };
                let uuid = CharUuid::from(uuid);
                map.insert(
                    uuid.clone(),
                    Capabilities {
                        subscribe: flags.notify || flags.indicate,
                        write: flags.write,
                        write_without_response: flags.write_without_response,
                        read: flags.read,
                    },
                );
                characteristics.entry(uuid).or_insert(characteristic);
            }
        }

        let (sender, events) = mpsc::unbounded_channel();
        let watcher = tokio::spawn(watch_disconnect(device.events().await?, sender.clone()));

        Ok(Connection {
            link: Box::new(BluezLink {
                map,
                characteristics,
                sender,
                subscriptions: Mutex::new(HashMap::new()),
                watcher,
            }),
            events,
            service_uuids,
        })
    }

    async fn recover(
        &self,
        handle: &Address,
        failures: u32,
        policy: &RetryPolicy,
    ) -> Result<(), ScaleError> {
        if failures >= policy.remove_device_after {
            info!(failures, "removing cached device from BlueZ");
            if let Err(error) = self.adapter.remove_device(*handle).await {
                debug!(?error, "failed to remove cached device");
            }
            self.rediscover(*handle).await?;
            sleep(policy.quiesce).await;
        }
        if policy.next_is_final(failures) {
            self.power_cycle().await?;
            self.rediscover(*handle).await?;
        }
        Ok(())
    }
}

async fn watch_disconnect(
    events: impl Stream<Item = DeviceEvent> + Send + 'static,
    sender: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut events = Box::pin(events);
    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            let _ = sender.send(LinkEvent::Disconnected);
            return;
        }
    }
    let _ = sender.send(LinkEvent::Disconnected);
}

async fn forward_notifications(
    values: impl Stream<Item = Vec<u8>> + Send + 'static,
    source: CharUuid,
    sender: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut values = Box::pin(values);
    while let Some(value) = values.next().await {
        let event = LinkEvent::Notification {
            source: source.clone(),
            value,
        };
        if sender.send(event).is_err() {
            return;
        }
    }
}

/// Connected BlueZ device. Each subscription is a task holding the
/// notify session open; aborting it unsubscribes.
#[derive(Debug)]
struct BluezLink {
    map: CharacteristicMap,
    characteristics: HashMap<CharUuid, Characteristic>,
    sender: mpsc::UnboundedSender<LinkEvent>,
    subscriptions: Mutex<HashMap<CharUuid, JoinHandle<()>>>,
    watcher: JoinHandle<()>,
}

impl BluezLink {
    fn characteristic(&self, uuid: &CharUuid) -> Result<&Characteristic, ScaleError> {
        self.characteristics
            .get(uuid)
            .ok_or_else(|| ScaleError::CharacteristicMissing {
                uuids: uuid.to_string(),
            })
    }
}

impl Drop for BluezLink {
    fn drop(&mut self) {
        self.watcher.abort();
        for task in self.subscriptions.get_mut().values() {
            task.abort();
        }
    }
}

#[async_trait]
impl GattLink for BluezLink {
    fn characteristics(&self) -> &CharacteristicMap {
        &self.map
    }

    #[instrument(skip_all, level = "trace", fields(%uuid))]
    async fn subscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
        let values = self.characteristic(uuid)?.notify().await?;
        let task = tokio::spawn(forward_notifications(
            values,
            uuid.clone(),
            self.sender.clone(),
        ));
        if let Some(previous) = self.subscriptions.lock().await.insert(uuid.clone(), task) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
        if let Some(task) = self.subscriptions.lock().await.remove(uuid) {
            task.abort();
        }
        Ok(())
    }

    #[instrument(skip_all, level = "trace", fields(%uuid, %mode, payload_len = payload.len()))]
    async fn write(
        &self,
        uuid: &CharUuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), ScaleError> {
        let request = CharacteristicWriteRequest {
            op_type: write_op(mode),
            ..CharacteristicWriteRequest::default()
        };
        self.characteristic(uuid)?
            .write_ext(payload, &request)
            .await?;
        Ok(())
    }

    async fn read(&self, uuid: &CharUuid) -> Result<Vec<u8>, ScaleError> {
        Ok(self.characteristic(uuid)?.read().await?)
    }
}

fn write_op(mode: WriteMode) -> WriteOp {
    match mode {
        WriteMode::WithResponse => WriteOp::Request,
        WriteMode::WithoutResponse => WriteOp::Command,
    }
}
