use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};

use super::{BackendKind, BleBackend, Connection, Discovered};
use crate::error::ScaleError;
use crate::gatt::{Capabilities, CharacteristicMap, GattLink, LinkEvent, WriteMode};
use crate::uuid::CharUuid;

type Sightings = Arc<Mutex<HashMap<String, Discovered<Device>>>>;

/// Backend over CoreBluetooth via `bluest`.
///
/// CoreBluetooth never exposes hardware addresses, so devices are keyed by
/// the peripheral identifier the OS assigns.
#[derive(Debug)]
pub(crate) struct CoreBluetoothBackend {
    adapter: Adapter,
    sightings: Sightings,
    scan: Mutex<Option<JoinHandle<()>>>,
}

impl CoreBluetoothBackend {
    pub(crate) async fn new() -> Result<Self, ScaleError> {
        let adapter = Adapter::default().await.ok_or(ScaleError::NoAdapters)?;
        Ok(Self {
            adapter,
            sightings: Arc::default(),
            scan: Mutex::new(None),
        })
    }
}

#[async_trait]
impl BleBackend for CoreBluetoothBackend {
    type Handle = Device;

    fn kind(&self) -> BackendKind {
        BackendKind::Corebluetooth
    }

    #[instrument(skip(self), level = "debug")]
    async fn wait_powered_on(&self) -> Result<(), ScaleError> {
        self.adapter.wait_available().await?;
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), ScaleError> {
        self.sightings.lock().await.clear();
        let adapter = self.adapter.clone();
        let sightings = Arc::clone(&self.sightings);
        let scan = tokio::spawn(async move {
            let mut advertisements = match adapter.scan(&[]).await {
                Ok(advertisements) => advertisements,
                Err(error) => {
                    warn!(?error, "CoreBluetooth scan failed to start");
                    return;
                }
            };
            while let Some(advertisement) = advertisements.next().await {
                let device = advertisement.device;
                let address = device.id().to_string();
                let name = device
                    .name()
                    .ok()
                    .or(advertisement.adv_data.local_name);
                let sighting = Discovered {
                    handle: device,
                    address: address.clone(),
                    name,
                    rssi: advertisement.rssi,
                    service_uuids: advertisement
                        .adv_data
                        .services
                        .into_iter()
                        .map(CharUuid::from)
                        .collect(),
                };
                sightings.lock().await.insert(address, sighting);
            }
        });
        if let Some(previous) = self.scan.lock().await.replace(scan) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), ScaleError> {
        if let Some(scan) = self.scan.lock().await.take() {
            scan.abort();
        }
        Ok(())
    }

    async fn visible_devices(&self) -> Result<Vec<Discovered<Device>>, ScaleError> {
        Ok(self.sightings.lock().await.values().cloned().collect())
    }

    #[instrument(skip_all, level = "debug", fields(id = %handle.id()))]
    async fn connect(&self, handle: &Device) -> Result<(), ScaleError> {
        if !handle.is_connected().await {
            self.adapter.connect_device(handle).await?;
        }
        Ok(())
    }

    async fn disconnect(&self, handle: &Device) -> Result<(), ScaleError> {
        if handle.is_connected().await {
            self.adapter.disconnect_device(handle).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, level = "debug", fields(id = %handle.id()))]
    async fn open_link(&self, handle: &Device) -> Result<Connection, ScaleError> {
        let mut map = CharacteristicMap::new();
        let mut characteristics = HashMap::new();
        let mut service_uuids = Vec::new();
        for service in handle.discover_services().await? {
            let service_characteristics = match service.discover_characteristics().await {
                Ok(service_characteristics) => service_characteristics,
                Err(error) => {
                    warn!(?error, service = %service.uuid(), "skipping service that failed to enumerate");
                    continue;
                }
            };
            service_uuids.push(CharUuid::from(service.uuid()));
            for characteristic in service_characteristics {
                let properties = match characteristic.properties().await {
                    Ok(properties) => properties,
                    Err(error) => {
                        debug!(?error, "skipping characteristic without readable properties");
                        continue;
                    }
                };
                let uuid = CharUuid::from(characteristic.uuid());
                map.insert(
                    uuid.clone(),
                    Capabilities {
                        subscribe: properties.notify || properties.indicate,
                        write: properties.write,
                        write_without_response: properties.write_without_response,
                        read: properties.read,
                    },
                );
                characteristics.entry(uuid).or_insert(characteristic);
            }
        }

        let (sender, events) = mpsc::unbounded_channel();
        let watcher = tokio::spawn(watch_disconnect(
            self.adapter.clone(),
            handle.clone(),
            sender.clone(),
        ));

        Ok(Connection {
            link: Box::new(CoreBluetoothLink {
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
}

async fn watch_disconnect(
    adapter: Adapter,
    device: Device,
    sender: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut events = match adapter.device_connection_events(&device).await {
        Ok(events) => events,
        Err(error) => {
            debug!(?error, "cannot watch connection events");
            return;
        }
    };
    while let Some(event) = events.next().await {
        if matches!(event, ConnectionEvent::Disconnected) {
            let _ = sender.send(LinkEvent::Disconnected);
            return;
        }
    }
}

/// Keeps a notify stream open until aborted, reporting whether it started.
async fn forward_notifications(
    characteristic: Characteristic,
    source: CharUuid,
    sender: mpsc::UnboundedSender<LinkEvent>,
    started: oneshot::Sender<Result<(), bluest::Error>>,
) {
    let mut values = match characteristic.notify().await {
        Ok(values) => {
            let _ = started.send(Ok(()));
            values
        }
        Err(error) => {
            let _ = started.send(Err(error));
            return;
        }
    };
    while let Some(value) = values.next().await {
        match value {
            Ok(value) => {
                let event = LinkEvent::Notification {
                    source: source.clone(),
                    value,
                };
                if sender.send(event).is_err() {
                    return;
                }
            }
            Err(error) => debug!(?error, %source, "notification error"),
        }
    }
}

#[derive(Debug)]
struct CoreBluetoothLink {
    map: CharacteristicMap,
    characteristics: HashMap<CharUuid, Characteristic>,
    sender: mpsc::UnboundedSender<LinkEvent>,
    subscriptions: Mutex<HashMap<CharUuid, JoinHandle<()>>>,
    watcher: JoinHandle<()>,
}

impl CoreBluetoothLink {
    fn characteristic(&self, uuid: &CharUuid) -> Result<&Characteristic, ScaleError> {
        self.characteristics
            .get(uuid)
            .ok_or_else(|| ScaleError::CharacteristicMissing {
                uuids: uuid.to_string(),
            })
    }
}

impl Drop for CoreBluetoothLink {
    fn drop(&mut self) {
        self.watcher.abort();
        for task in self.subscriptions.get_mut().values() {
            task.abort();
        }
    }
}

#[async_trait]
impl GattLink for CoreBluetoothLink {
    fn characteristics(&self) -> &CharacteristicMap {
        &self.map
    }

    #[instrument(skip_all, level = "trace", fields(%uuid))]
    async fn subscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
        let characteristic = self.characteristic(uuid)?.clone();
        let (started, outcome) = oneshot::channel();
        let task = tokio::spawn(forward_notifications(
            characteristic,
            uuid.clone(),
            self.sender.clone(),
            started,
        ));
        match outcome.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(error.into()),
            Err(_closed) => {
                return Err(ScaleError::UnexpectedDisconnect);
            }
        }
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
        let characteristic = self.characteristic(uuid)?;
        match mode {
            WriteMode::WithResponse => characteristic.write(payload).await?,
            WriteMode::WithoutResponse => characteristic.write_without_response(payload).await?,
        }
        Ok(())
    }

    async fn read(&self, uuid: &CharUuid) -> Result<Vec<u8>, ScaleError> {
        Ok(self.characteristic(uuid)?.read().await?)
    }
}
