use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::backend::validate_address;
use super::{BackendKind, BleBackend, Connection, Discovered, ScanOptions, ScanResult};
use crate::adapters::{AdapterRegistry, DeviceInfo, ScaleAdapter};
use crate::error::ScaleError;
use crate::gatt::Dispatch;
use crate::measurement::{BodyComposition, Reading, UserProfile};

/// A completed reading together with the adapter that produced it.
///
/// Lets a caller pick the user profile by weight before computing metrics.
#[derive(Debug)]
pub struct RawMeasurement {
    pub reading: Reading,
    pub adapter: Box<dyn ScaleAdapter>,
}

impl RawMeasurement {
    /// Computes body composition for the chosen profile.
    ///
    /// # Errors
    ///
    /// Returns an error when the adapter rejects the reading or profile.
    pub fn compute(&self, profile: &UserProfile) -> Result<BodyComposition, ScaleError> {
        self.adapter.compute_metrics(&self.reading, profile)
    }
}

/// High-level scale operations, independent of the BLE library underneath.
#[async_trait]
pub trait ScaleConnector: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Discovers a scale, connects, streams a measurement and computes
    /// body composition.
    async fn scan_and_read(&self, options: &ScanOptions) -> Result<BodyComposition, ScaleError>;

    /// Like [`ScaleConnector::scan_and_read`] but stops before computing metrics.
    async fn scan_and_read_raw(&self, options: &ScanOptions)
    -> Result<RawMeasurement, ScaleError>;

    /// Lists every device advertising within `duration`, annotated with the
    /// adapter that would claim it.
    async fn scan_devices(
        &self,
        adapters: &AdapterRegistry,
        duration: Duration,
    ) -> Result<Vec<ScanResult>, ScaleError>;
}

/// Shared discovery, connect-retry and streaming driver over one backend.
///
/// Holds a session slot so only one scan or connection runs at a time.
pub struct Connector<B: BleBackend> {
    backend: B,
    session: Mutex<()>,
}

impl<B: BleBackend> fmt::Debug for Connector<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

impl<B: BleBackend> Connector<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            session: Mutex::new(()),
        }
    }

    #[instrument(skip_all, level = "info", fields(backend = %self.backend.kind()))]
    async fn session(&self, options: &ScanOptions) -> Result<RawMeasurement, ScaleError> {
        if let Some(target) = &options.target_mac {
            validate_address(target)?;
        }
        let _slot = self
            .session
            .try_lock()
            .map_err(|_| ScaleError::SessionInProgress)?;
        let cancel = &options.cancel;

        let powered = timeout(options.timeouts.power_on, self.backend.wait_powered_on());
        match cancellable(cancel, powered).await? {
            Ok(result) => result?,
            Err(_elapsed) => {
                return Err(ScaleError::AdapterNotPoweredOn {
                    timeout: options.timeouts.power_on,
                });
            }
        }

        let (device, adapter) = self.discover(options).await?;
        info!(device = %device.label(), adapter = adapter.as_ref().map(|a| a.name()), "scale found");

        let settle = self.backend.settle_delay(options.timeouts.settle);
        if !settle.is_zero() {
            cancellable(cancel, sleep(settle)).await?;
        }

        self.connect_with_retry(&device, options).await?;
        let outcome = self.stream(&device, adapter, options).await;
        if let Err(error) = self.backend.disconnect(&device.handle).await {
            debug!(?error, "failed to disconnect after session");
        }
        outcome
    }

    /// Polls visible devices until one matches the target address or a
    /// registry adapter.
    async fn discover(
        &self,
        options: &ScanOptions,
    ) -> Result<(Discovered<B::Handle>, Option<Box<dyn ScaleAdapter>>), ScaleError> {
        self.backend.start_discovery().await?;
        let search = timeout(options.timeouts.discovery, self.poll_for_match(options));
        let found = cancellable(&options.cancel, search).await;
        if let Err(error) = self.backend.stop_discovery().await {
            debug!(?error, "failed to stop discovery");
        }

        match found? {
            Ok(result) => result,
            Err(_elapsed) => Err(ScaleError::DiscoveryTimeout {
                timeout: options.timeouts.discovery,
            }),
        }
    }

    async fn poll_for_match(
        &self,
        options: &ScanOptions,
    ) -> Result<(Discovered<B::Handle>, Option<Box<dyn ScaleAdapter>>), ScaleError> {
        let timeouts = &options.timeouts;
        let mut polls = 0u32;
        loop {
            polls += 1;
            let devices = self.backend.visible_devices().await?;
            for device in devices {
                if let Some(target) = &options.target_mac {
                    if device.has_address(target) {
                        return Ok((device, None));
                    }
                    continue;
                }
                if let Some(adapter) = options.adapters.resolve(&device.device_info()) {
                    return Ok((device, Some(adapter)));
                }
            }

            if timeouts.heartbeat_every > 0 && polls.is_multiple_of(timeouts.heartbeat_every) {
                info!(polls, "still scanning for a supported scale");
            }
            sleep(timeouts.poll_interval).await;
        }
    }

    /// Connects with bounded retries, disconnecting after every failure and
    /// letting the backend escalate its recovery.
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::ConnectFailure`] naming the number of attempts
    /// once every attempt failed, or [`ScaleError::Aborted`]. An attempt cut
    /// short by the abort is disconnected first.
    pub async fn connect_with_retry(
        &self,
        device: &Discovered<B::Handle>,
        options: &ScanOptions,
    ) -> Result<(), ScaleError> {
        let policy = &options.retry;
        let attempts = policy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let bounded = timeout(options.timeouts.connect, self.backend.connect(&device.handle));
            let outcome = match cancellable(&options.cancel, bounded).await {
                Ok(outcome) => outcome,
                Err(aborted) => {
                    // The dropped attempt may have left a half-open link.
                    if let Err(error) = self.backend.disconnect(&device.handle).await {
                        debug!(?error, "disconnect after aborted attempt failed");
                    }
                    return Err(aborted);
                }
            };
            let error = match outcome {
                Ok(Ok(())) => {
                    info!(attempt, device = %device.label(), "connected");
                    return Ok(());
                }
                Ok(Err(error)) => error,
                Err(_elapsed) => ScaleError::ConnectTimeout {
                    timeout: options.timeouts.connect,
                },
            };
            warn!(attempt, attempts, %error, "connect attempt failed");

            if let Err(error) = self.backend.disconnect(&device.handle).await {
                debug!(?error, "disconnect after failed attempt failed");
            }
            if attempt >= attempts {
                return Err(ScaleError::ConnectFailure {
                    attempts,
                    source: Box::new(error),
                });
            }

            let recovery = self.backend.recover(&device.handle, attempt, policy);
            if let Err(error) = cancellable(&options.cancel, recovery).await? {
                warn!(?error, attempt, "connect recovery step failed");
            }
            cancellable(&options.cancel, sleep(policy.delay_for(attempt))).await?;
        }
    }

    async fn stream(
        &self,
        device: &Discovered<B::Handle>,
        adapter: Option<Box<dyn ScaleAdapter>>,
        options: &ScanOptions,
    ) -> Result<RawMeasurement, ScaleError> {
        let opening = timeout(
            options.timeouts.service_discovery,
            self.backend.open_link(&device.handle),
        );
        let Connection {
            link,
            mut events,
            service_uuids,
        } = match cancellable(&options.cancel, opening).await? {
            Ok(connection) => connection?,
            Err(_elapsed) => {
                return Err(ScaleError::ServiceDiscoveryTimeout {
                    timeout: options.timeouts.service_discovery,
                });
            }
        };
        debug!(characteristics = link.characteristics().len(), "characteristics enumerated");

        let mut adapter = match adapter {
            Some(adapter) => adapter,
            None => {
                let mut services = device.service_uuids.clone();
                services.extend(service_uuids);
                let info = DeviceInfo::new(
                    device.name.clone().unwrap_or_default(),
                    services.iter().map(|uuid| uuid.as_str()),
                );
                options.adapters.resolve(&info).ok_or_else(|| {
                    ScaleError::DeviceUnrecognized {
                        device: device.label(),
                    }
                })?
            }
        };

        let reading = Dispatch::builder()
            .link(link.as_ref())
            .profile(&options.profile)
            .weight_unit(options.weight_unit)
            .maybe_on_live_data(options.on_live_data.clone())
            .cancel(options.cancel.clone())
            .build()
            .run_raw(adapter.as_mut(), &mut events)
            .await?;

        Ok(RawMeasurement { reading, adapter })
    }
}

#[async_trait]
impl<B: BleBackend> ScaleConnector for Connector<B> {
    fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    async fn scan_and_read(&self, options: &ScanOptions) -> Result<BodyComposition, ScaleError> {
        let raw = self.session(options).await?;
        raw.compute(&options.profile)
    }

    async fn scan_and_read_raw(
        &self,
        options: &ScanOptions,
    ) -> Result<RawMeasurement, ScaleError> {
        self.session(options).await
    }

    #[instrument(skip(self, adapters), level = "info", fields(backend = %self.backend.kind()))]
    async fn scan_devices(
        &self,
        adapters: &AdapterRegistry,
        duration: Duration,
    ) -> Result<Vec<ScanResult>, ScaleError> {
        let _slot = self
            .session
            .try_lock()
            .map_err(|_| ScaleError::SessionInProgress)?;
        let timeouts = super::SessionTimeouts::default();
        match timeout(timeouts.power_on, self.backend.wait_powered_on()).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                return Err(ScaleError::AdapterNotPoweredOn {
                    timeout: timeouts.power_on,
                });
            }
        }

        self.backend.start_discovery().await?;
        let collected = self.collect(adapters, duration, timeouts.poll_interval).await;
        if let Err(error) = self.backend.stop_discovery().await {
            debug!(?error, "failed to stop discovery");
        }

        let mut results: Vec<ScanResult> = collected?.into_values().collect();
        results.sort_by(|left, right| {
            right
                .rssi
                .unwrap_or(i16::MIN)
                .cmp(&left.rssi.unwrap_or(i16::MIN))
                .then_with(|| left.address.cmp(&right.address))
        });
        Ok(results)
    }
}

impl<B: BleBackend> Connector<B> {
    async fn collect(
        &self,
        adapters: &AdapterRegistry,
        duration: Duration,
        poll_interval: Duration,
    ) -> Result<BTreeMap<String, ScanResult>, ScaleError> {
        let mut seen = BTreeMap::new();
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            for device in self.backend.visible_devices().await? {
                let adapter = adapters.identify(&device.device_info());
                seen.insert(
                    device.address.clone(),
                    ScanResult {
                        address: device.address,
                        name: device.name,
                        rssi: device.rssi,
                        service_uuids: device.service_uuids,
                        adapter,
                    },
                );
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(seen);
            }
            tokio::time::sleep_until(deadline.min(tokio::time::Instant::now() + poll_interval))
                .await;
        }
    }
}

/// Runs `future` unless `cancel` fires first.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, ScaleError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ScaleError::Aborted),
        output = future => Ok(output),
    }
}
