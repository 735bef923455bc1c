use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::{GattLink, LinkEvent, LinkEvents, WriteMode};
use crate::adapters::{HandshakeContext, HandshakeStyle, ProtocolLayout, ScaleAdapter};
use crate::error::ScaleError;
use crate::measurement::{BodyComposition, Reading, UserProfile, WeightUnit};
use crate::utils::format_hex;
use crate::uuid::CharUuid;

/// Receives every interim reading, already converted to kilograms.
pub type LiveDataCallback = Arc<dyn Fn(&Reading) + Send + Sync>;

/// Drives one adapter over one connected link until the measurement
/// completes, the device disconnects or the session is cancelled.
///
/// Every subscription made during the run is released before returning,
/// whatever the outcome.
#[derive(Builder)]
pub struct Dispatch<'a> {
    link: &'a dyn GattLink,
    profile: &'a UserProfile,
    #[builder(default)]
    weight_unit: WeightUnit,
    on_live_data: Option<LiveDataCallback>,
    #[builder(default)]
    cancel: CancellationToken,
}

struct Unlock {
    uuid: CharUuid,
    command: Vec<u8>,
    mode: WriteMode,
    ticker: Interval,
}

impl Dispatch<'_> {
    /// Runs the session and computes the finished body composition.
    ///
    /// # Errors
    ///
    /// Returns an error when the handshake fails, the device disconnects
    /// before completion, the session is cancelled or the adapter rejects
    /// the final reading.
    pub async fn run(
        &self,
        adapter: &mut dyn ScaleAdapter,
        events: &mut LinkEvents,
    ) -> Result<BodyComposition, ScaleError> {
        let reading = self.run_raw(adapter, events).await?;
        adapter.compute_metrics(&reading, self.profile)
    }

    /// Runs the session and returns the completed reading without metrics.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatch::run`], minus metric computation.
    #[instrument(skip_all, level = "debug", fields(adapter = adapter.name()))]
    pub async fn run_raw(
        &self,
        adapter: &mut dyn ScaleAdapter,
        events: &mut LinkEvents,
    ) -> Result<Reading, ScaleError> {
        let mut subscribed = Vec::new();
        let outcome = self.drive(adapter, events, &mut subscribed).await;
        self.teardown(&subscribed).await;
        outcome
    }

    async fn drive(
        &self,
        adapter: &mut dyn ScaleAdapter,
        events: &mut LinkEvents,
        subscribed: &mut Vec<CharUuid>,
    ) -> Result<Reading, ScaleError> {
        let layout = adapter.layout();
        let mut unlock = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ScaleError::Aborted),
            started = self.start(adapter, &layout, subscribed) => started?,
        };

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ScaleError::Aborted),
                event = events.recv() => match event {
                    Some(LinkEvent::Notification { source, value }) => {
                        if let Some(reading) =
                            self.handle(adapter, layout.normalizes_weight, &source, &value).await
                        {
                            return Ok(reading);
                        }
                    }
                    Some(LinkEvent::Disconnected) | None => {
                        warn!("device disconnected before the measurement completed");
                        return Err(ScaleError::UnexpectedDisconnect);
                    }
                },
                () = next_unlock(&mut unlock) => {
                    if let Some(unlock) = &unlock
                        && let Err(error) = self.link.write(&unlock.uuid, &unlock.command, unlock.mode).await
                    {
                        warn!(?error, uuid = %unlock.uuid, "repeated unlock write failed");
                    }
                }
            }
        }
    }

    async fn start(
        &self,
        adapter: &mut dyn ScaleAdapter,
        layout: &ProtocolLayout,
        subscribed: &mut Vec<CharUuid>,
    ) -> Result<Option<Unlock>, ScaleError> {
        debug!(handshake = %layout.handshake, "starting handshake");
        match layout.handshake {
            HandshakeStyle::Legacy => self.start_legacy(layout, subscribed).await,
            HandshakeStyle::MultiCharacteristic => {
                self.start_multi(adapter.name(), layout, subscribed).await?;
                Ok(None)
            }
            HandshakeStyle::Custom => {
                let mut ctx = LinkHandshake {
                    link: self.link,
                    subscribed,
                    profile: self.profile,
                };
                adapter.on_connected(&mut ctx).await?;
                Ok(None)
            }
        }
    }

    async fn start_legacy(
        &self,
        layout: &ProtocolLayout,
        subscribed: &mut Vec<CharUuid>,
    ) -> Result<Option<Unlock>, ScaleError> {
        let map = self.link.characteristics();
        let pair = map.resolve_legacy(layout)?;
        // Recorded first so teardown also covers an interrupted subscribe.
        subscribed.push(pair.notify.clone());

        let Some(write) = pair.write.filter(|_| !layout.unlock_command.is_empty()) else {
            self.link.subscribe(&pair.notify).await?;
            return Ok(None);
        };

        // Some scales stop advertising unless the unlock arrives right away.
        let mode = map.write_mode(&write);
        let (subscribe, first_unlock) = tokio::join!(
            self.link.subscribe(&pair.notify),
            self.link.write(&write, &layout.unlock_command, mode),
        );
        subscribe?;
        if let Err(error) = first_unlock {
            warn!(?error, uuid = %write, "initial unlock write failed");
        }

        if layout.unlock_interval.is_zero() {
            return Ok(None);
        }
        let mut ticker = interval_at(
            Instant::now() + layout.unlock_interval,
            layout.unlock_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Some(Unlock {
            uuid: write,
            command: layout.unlock_command.clone(),
            mode,
            ticker,
        }))
    }

    async fn start_multi(
        &self,
        adapter: &'static str,
        layout: &ProtocolLayout,
        subscribed: &mut Vec<CharUuid>,
    ) -> Result<(), ScaleError> {
        let declared: Vec<&'static str> = layout.notify_bindings().collect();
        if declared.is_empty() {
            return Err(ScaleError::Handshake {
                adapter,
                reason: "no notify characteristics declared".to_string(),
            });
        }

        let map = self.link.characteristics();
        for uuid in &declared {
            if !map.contains(uuid) {
                warn!(uuid, "declared notify characteristic is not present");
                continue;
            }
            let uuid = CharUuid::new(uuid);
            subscribed.push(uuid.clone());
            self.link.subscribe(&uuid).await?;
        }

        if subscribed.is_empty() {
            return Err(ScaleError::CharacteristicMissing {
                uuids: declared.join(", "),
            });
        }
        Ok(())
    }

    async fn handle(
        &self,
        adapter: &mut dyn ScaleAdapter,
        normalizes_weight: bool,
        source: &CharUuid,
        value: &[u8],
    ) -> Option<Reading> {
        trace!(%source, payload = %format_hex(value), "notification received");
        let parsed = adapter.parse_char_notification(source, value);

        for outgoing in adapter.take_outgoing() {
            let mode = if outgoing.with_response {
                WriteMode::WithResponse
            } else {
                self.link.characteristics().write_mode(&outgoing.uuid)
            };
            if let Err(error) = self
                .link
                .write(&outgoing.uuid, &outgoing.payload, mode)
                .await
            {
                warn!(?error, uuid = %outgoing.uuid, "queued adapter write failed");
            }
        }

        let mut reading = parsed?;
        if self.weight_unit == WeightUnit::Lbs && !normalizes_weight {
            reading = reading.pounds_to_kilograms();
        }
        if let Some(on_live_data) = &self.on_live_data {
            on_live_data(&reading);
        }
        if !adapter.is_complete(&reading) {
            return None;
        }

        info!(
            weight = reading.weight,
            impedance = reading.impedance,
            "measurement complete"
        );
        Some(reading)
    }

    async fn teardown(&self, subscribed: &[CharUuid]) {
        for uuid in subscribed {
            if let Err(error) = self.link.unsubscribe(uuid).await {
                debug!(?error, %uuid, "failed to unsubscribe during teardown");
            }
        }
    }
}

async fn next_unlock(unlock: &mut Option<Unlock>) {
    match unlock {
        Some(unlock) => {
            unlock.ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// [`HandshakeContext`] bound to a live link.
struct LinkHandshake<'a> {
    link: &'a dyn GattLink,
    subscribed: &'a mut Vec<CharUuid>,
    profile: &'a UserProfile,
}

impl LinkHandshake<'_> {
    fn known(&self, uuid: &str) -> Result<CharUuid, ScaleError> {
        let uuid = CharUuid::new(uuid);
        if self.link.characteristics().contains(uuid.as_str()) {
            Ok(uuid)
        } else {
            Err(ScaleError::CharacteristicMissing {
                uuids: uuid.to_string(),
            })
        }
    }
}

#[async_trait]
impl HandshakeContext for LinkHandshake<'_> {
    async fn write(
        &mut self,
        uuid: &str,
        payload: &[u8],
        with_response: bool,
    ) -> Result<(), ScaleError> {
        let uuid = self.known(uuid)?;
        let mode = if with_response {
            WriteMode::WithResponse
        } else {
            self.link.characteristics().write_mode(&uuid)
        };
        self.link.write(&uuid, payload, mode).await
    }

    async fn read(&mut self, uuid: &str) -> Result<Vec<u8>, ScaleError> {
        let uuid = self.known(uuid)?;
        self.link.read(&uuid).await
    }

    async fn subscribe(&mut self, uuid: &str) -> Result<(), ScaleError> {
        let uuid = self.known(uuid)?;
        if !self.subscribed.contains(&uuid) {
            self.subscribed.push(uuid.clone());
        }
        self.link.subscribe(&uuid).await
    }

    fn profile(&self) -> &UserProfile {
        self.profile
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;
    use crate::adapters::{
        CharBinding, DeviceInfo, QnAdapter, SoehnleAdapter, StandardGattAdapter,
    };
    use crate::gatt::{Capabilities, CharacteristicMap};
    use crate::measurement::Gender;

    const QN_CONFIG: &str = "130915011000000042";
    const QN_STABLE: [u8; 10] = [0x10, 0x0A, 0x01, 0x1F, 0x40, 0x01, 0x02, 0x26, 0x02, 0x12];
    const SOEHNLE_MEASUREMENT: &str = "352e3001-28e9-40b8-a361-6db4cca4147c";
    const SOEHNLE_COMMAND: &str = "352e3002-28e9-40b8-a361-6db4cca4147c";

    #[derive(Debug, Default)]
    struct RecordingLink {
        map: CharacteristicMap,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingLink {
        fn with(characteristics: &[(&str, Capabilities)]) -> Self {
            Self {
                map: characteristics.iter().copied().collect(),
                calls: Mutex::default(),
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().expect("call log lock").push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("call log lock").clone()
        }
    }

    #[async_trait]
    impl GattLink for RecordingLink {
        fn characteristics(&self) -> &CharacteristicMap {
            &self.map
        }

        async fn subscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
            self.record(format!("subscribe {uuid}"));
            Ok(())
        }

        async fn unsubscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError> {
            self.record(format!("unsubscribe {uuid}"));
            Ok(())
        }

        async fn write(
            &self,
            uuid: &CharUuid,
            payload: &[u8],
            _mode: WriteMode,
        ) -> Result<(), ScaleError> {
            self.record(format!("write {uuid} {}", hex::encode(payload)));
            Ok(())
        }

        async fn read(&self, uuid: &CharUuid) -> Result<Vec<u8>, ScaleError> {
            self.record(format!("read {uuid}"));
            Ok(Vec::new())
        }
    }

    /// Reports the first byte as the weight and completes at `complete_at`.
    #[derive(Debug)]
    struct ScriptedAdapter {
        layout: ProtocolLayout,
        complete_at: f64,
    }

    impl ScaleAdapter for ScriptedAdapter {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn matches(&mut self, _device: &DeviceInfo) -> bool {
            true
        }

        fn layout(&self) -> ProtocolLayout {
            self.layout.clone()
        }

        fn parse_notification(&mut self, data: &[u8]) -> Option<Reading> {
            data.first().map(|weight| Reading::weight_only(f64::from(*weight)))
        }

        fn is_complete(&self, reading: &Reading) -> bool {
            reading.weight >= self.complete_at
        }
    }

    fn profile() -> UserProfile {
        UserProfile::builder()
            .height_cm(180.0)
            .age_years(30)
            .gender(Gender::Male)
            .build()
    }

    fn qn_link() -> RecordingLink {
        RecordingLink::with(&[
            ("ffe1", Capabilities::notify()),
            ("ffe3", Capabilities::writable()),
        ])
    }

    fn notification(source: &str, value: &[u8]) -> LinkEvent {
        LinkEvent::Notification {
            source: CharUuid::new(source),
            value: value.to_vec(),
        }
    }

    fn events(items: Vec<LinkEvent>) -> (mpsc::UnboundedSender<LinkEvent>, LinkEvents) {
        let (sender, receiver) = mpsc::unbounded_channel();
        for item in items {
            sender.send(item).expect("receiver should be open");
        }
        (sender, receiver)
    }

    #[tokio::test]
    async fn legacy_subscribes_unlocks_and_tears_down() {
        let link = qn_link();
        let profile = profile();
        let (_sender, mut receiver) = events(vec![notification("ffe1", &QN_STABLE)]);

        let reading = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run_raw(&mut QnAdapter::default(), &mut receiver)
            .await
            .expect("session should complete");

        assert_eq!(Reading::new(80.0, 550.0), reading);
        let calls = link.calls();
        assert_eq!(3, calls.len());
        assert!(calls.contains(&"subscribe ffe1".to_string()));
        assert!(calls.contains(&format!("write ffe3 {QN_CONFIG}")));
        assert_eq!("unsubscribe ffe1", calls[2]);
    }

    #[tokio::test]
    async fn legacy_uses_alternate_pair_when_primary_is_absent() {
        let link = RecordingLink::with(&[
            ("fff1", Capabilities::notify()),
            ("fff2", Capabilities::writable()),
        ]);
        let profile = profile();
        let (_sender, mut receiver) = events(vec![notification("fff1", &QN_STABLE)]);

        Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run_raw(&mut QnAdapter::default(), &mut receiver)
            .await
            .expect("session should complete");

        let calls = link.calls();
        assert!(calls.contains(&"subscribe fff1".to_string()));
        assert!(calls.contains(&format!("write fff2 {QN_CONFIG}")));
    }

    #[tokio::test]
    async fn missing_characteristics_fail_before_subscribing() {
        let link = RecordingLink::with(&[("2a9d", Capabilities::notify())]);
        let profile = profile();
        let (_sender, mut receiver) = events(Vec::new());

        let result = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run_raw(&mut QnAdapter::default(), &mut receiver)
            .await;

        assert_matches!(result, Err(ScaleError::CharacteristicMissing { .. }));
        assert!(link.calls().is_empty());
    }

    #[tokio::test]
    async fn disconnect_before_completion_fails_without_partial_result() {
        let link = qn_link();
        let profile = profile();
        let weight_only = [0x10, 0x0A, 0x01, 0x1F, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00];
        let (_sender, mut receiver) = events(vec![
            notification("ffe1", &weight_only),
            LinkEvent::Disconnected,
        ]);

        let result = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run(&mut QnAdapter::default(), &mut receiver)
            .await;

        assert_matches!(result, Err(ScaleError::UnexpectedDisconnect));
        assert_eq!(Some("unsubscribe ffe1"), link.calls().last().map(String::as_str));
    }

    #[tokio::test]
    async fn closed_event_stream_counts_as_disconnect() {
        let link = qn_link();
        let profile = profile();
        let (sender, mut receiver) = events(Vec::new());
        drop(sender);

        let result = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run_raw(&mut QnAdapter::default(), &mut receiver)
            .await;

        assert_matches!(result, Err(ScaleError::UnexpectedDisconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_and_releases_subscriptions() {
        let link = qn_link();
        let profile = profile();
        let (_sender, mut receiver) = events(Vec::new());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let result = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .cancel(cancel)
            .build()
            .run_raw(&mut QnAdapter::default(), &mut receiver)
            .await;

        assert_matches!(result, Err(ScaleError::Aborted));
        assert_eq!(Some("unsubscribe ffe1"), link.calls().last().map(String::as_str));
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_command_repeats_until_complete() {
        let link = qn_link();
        let profile = profile();
        let (sender, mut receiver) = events(Vec::new());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = sender.send(notification("ffe1", &QN_STABLE));
        });

        Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run_raw(&mut QnAdapter::default(), &mut receiver)
            .await
            .expect("session should complete");

        let unlock = format!("write ffe3 {QN_CONFIG}");
        let writes = link.calls().iter().filter(|call| **call == unlock).count();
        // initial write plus the 2 s and 4 s repeats
        assert_eq!(3, writes);
    }

    #[tokio::test]
    async fn queued_adapter_writes_follow_the_notification() {
        let link = qn_link();
        let profile = profile();
        let scale_info = [0x12, 0x0B, 0x15, 0, 0, 0, 0, 0, 0, 0, 0x01];
        let (_sender, mut receiver) = events(vec![
            notification("ffe1", &scale_info),
            notification("ffe1", &QN_STABLE),
        ]);

        let reading = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run_raw(&mut QnAdapter::default(), &mut receiver)
            .await
            .expect("session should complete");

        assert_eq!(80.0, reading.weight);
        let unlock = format!("write ffe3 {QN_CONFIG}");
        assert_eq!(2, link.calls().iter().filter(|call| **call == unlock).count());
    }

    #[tokio::test]
    async fn multi_characteristic_subscribes_present_bindings_only() {
        let link = RecordingLink::with(&[("2a9d", Capabilities::notify())]);
        let profile = profile();
        let (_sender, mut receiver) = events(vec![notification("2a9d", &[0x00, 0x98, 0x3A])]);

        let reading = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run_raw(&mut StandardGattAdapter::default(), &mut receiver)
            .await
            .expect("weight-only session should complete");

        assert_eq!(75.0, reading.weight);
        assert_eq!(vec!["subscribe 2a9d", "unsubscribe 2a9d"], link.calls());
    }

    #[tokio::test]
    async fn multi_characteristic_requires_declared_bindings() {
        let link = RecordingLink::with(&[("2a9d", Capabilities::notify())]);
        let profile = profile();
        let (_sender, mut receiver) = events(Vec::new());
        let mut adapter = ScriptedAdapter {
            layout: ProtocolLayout::builder()
                .handshake(HandshakeStyle::MultiCharacteristic)
                .bindings(vec![CharBinding::write("2a9d")])
                .build(),
            complete_at: 1.0,
        };

        let result = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run_raw(&mut adapter, &mut receiver)
            .await;

        assert_matches!(result, Err(ScaleError::Handshake { adapter: "scripted", .. }));
    }

    #[tokio::test]
    async fn custom_handshake_runs_against_the_link() {
        let link = RecordingLink::with(&[
            (SOEHNLE_MEASUREMENT, Capabilities::notify()),
            (SOEHNLE_COMMAND, Capabilities::writable()),
        ]);
        let profile = profile();
        let frame = [
            0x09, 0x01, 0x07, 0xE8, 0x03, 0x0F, 0x08, 0x1E, 0x00, 0x02, 0xEE, 0x01, 0x90, 0x01,
            0xE0,
        ];
        let (_sender, mut receiver) = events(vec![notification(SOEHNLE_MEASUREMENT, &frame)]);

        let composition = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .build()
            .run(&mut SoehnleAdapter, &mut receiver)
            .await
            .expect("session should complete");

        assert_eq!(75.0, composition.weight);
        let measurement = CharUuid::new(SOEHNLE_MEASUREMENT);
        assert_eq!(
            vec![
                format!("subscribe {measurement}"),
                format!("write {} 0901", CharUuid::new(SOEHNLE_COMMAND)),
                format!("unsubscribe {measurement}"),
            ],
            link.calls()
        );
    }

    #[tokio::test]
    async fn pounds_are_converted_before_live_data_and_completion() {
        let link = RecordingLink::with(&[("fff1", Capabilities::notify())]);
        let profile = profile();
        let (_sender, mut receiver) = events(vec![
            notification("fff1", &[50]),
            notification("fff1", &[100]),
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut adapter = ScriptedAdapter {
            layout: ProtocolLayout::builder().notify("fff1").build(),
            complete_at: 45.0,
        };

        let reading = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .weight_unit(WeightUnit::Lbs)
            .on_live_data(Arc::new(move |reading: &Reading| {
                sink.lock().expect("live data lock").push(reading.weight);
            }))
            .build()
            .run_raw(&mut adapter, &mut receiver)
            .await
            .expect("session should complete");

        assert!((reading.weight - 45.359_237).abs() < 1e-9);
        let seen = seen.lock().expect("live data lock").clone();
        assert_eq!(2, seen.len());
        assert!((seen[0] - 22.679_618_5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn normalizing_adapters_skip_pound_conversion() {
        let link = qn_link();
        let profile = profile();
        let (_sender, mut receiver) = events(vec![notification("ffe1", &QN_STABLE)]);

        let reading = Dispatch::builder()
            .link(&link)
            .profile(&profile)
            .weight_unit(WeightUnit::Lbs)
            .build()
            .run_raw(&mut QnAdapter::default(), &mut receiver)
            .await
            .expect("session should complete");

        assert_eq!(80.0, reading.weight);
    }
}
