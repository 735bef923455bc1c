//! Vendor protocol decoders.
//!
//! Each scale family implements [`ScaleAdapter`]. An adapter instance owns
//! the decode state of exactly one session and is built fresh from the
//! [`AdapterRegistry`] for every scan.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;

use crate::error::ScaleError;
use crate::measurement::{BodyComposition, Reading, UserProfile, VendorComposition};
use crate::metrics;
use crate::uuid::{CharUuid, normalize};

mod active_era;
mod beurer_sanitas;
pub(crate) mod codec;
mod digoo;
mod es_cs20m;
mod excelvan;
mod exingtech;
mod hesley;
mod hoffen;
mod inlife;
mod medisana;
mod mgb;
mod one_byone;
mod qn;
mod registry;
mod renpho;
mod sanitas_sbf72;
mod senssun;
mod soehnle;
mod standard;
mod trisa;
mod xiaomi;
mod yunmai;

pub use self::active_era::ActiveEraAdapter;
pub use self::beurer_sanitas::BeurerSanitasAdapter;
pub use self::digoo::DigooAdapter;
pub use self::es_cs20m::EsCs20mAdapter;
pub use self::excelvan::ExcelvanAdapter;
pub use self::exingtech::ExingtechAdapter;
pub use self::hesley::HesleyAdapter;
pub use self::hoffen::HoffenAdapter;
pub use self::inlife::InlifeAdapter;
pub use self::medisana::MedisanaAdapter;
pub use self::mgb::MgbAdapter;
pub use self::one_byone::OneByoneAdapter;
pub use self::qn::QnAdapter;
pub use self::registry::AdapterRegistry;
pub use self::renpho::RenphoAdapter;
pub use self::sanitas_sbf72::SanitasSbf72Adapter;
pub use self::senssun::SenssunAdapter;
pub use self::soehnle::SoehnleAdapter;
pub use self::standard::StandardGattAdapter;
pub use self::trisa::TrisaAdapter;
pub use self::xiaomi::XiaomiAdapter;
pub use self::yunmai::YunmaiAdapter;

/// Default delay between repeated unlock writes.
pub const DEFAULT_UNLOCK_INTERVAL: Duration = Duration::from_millis(2_000);

/// Advertisement details used to pick an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    name: String,
    service_uuids: Vec<CharUuid>,
}

impl DeviceInfo {
    /// Creates device details from a local name and advertised service UUIDs.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, service_uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            service_uuids: service_uuids
                .into_iter()
                .map(|uuid| CharUuid::new(uuid.as_ref()))
                .collect(),
        }
    }

    /// Returns the advertised local name (empty when none was advertised).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the advertised service UUIDs in normalized form.
    #[must_use]
    pub fn service_uuids(&self) -> &[CharUuid] {
        &self.service_uuids
    }

    /// Returns whether the lower-cased name contains `needle` (given lower-case).
    #[must_use]
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name.to_ascii_lowercase().contains(needle)
    }

    /// Returns whether the lower-cased name starts with `prefix` (given lower-case).
    #[must_use]
    pub fn name_starts_with(&self, prefix: &str) -> bool {
        self.name.to_ascii_lowercase().starts_with(prefix)
    }

    /// Returns whether a service UUID was advertised.
    #[must_use]
    pub fn advertises(&self, uuid: &str) -> bool {
        let wanted = normalize(uuid);
        self.service_uuids
            .iter()
            .any(|candidate| candidate.as_str() == wanted)
    }
}

/// Capability requested for a characteristic binding.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BindingKind {
    Notify,
    Write,
    Read,
}

/// One declared characteristic of a multi-characteristic protocol.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CharBinding {
    pub uuid: &'static str,
    pub kind: BindingKind,
}

impl CharBinding {
    #[must_use]
    pub const fn notify(uuid: &'static str) -> Self {
        Self {
            uuid,
            kind: BindingKind::Notify,
        }
    }

    #[must_use]
    pub const fn write(uuid: &'static str) -> Self {
        Self {
            uuid,
            kind: BindingKind::Write,
        }
    }

    #[must_use]
    pub const fn read(uuid: &'static str) -> Self {
        Self {
            uuid,
            kind: BindingKind::Read,
        }
    }
}

/// How the dispatch engine drives an adapter once connected.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum HandshakeStyle {
    /// Subscribe to one notify characteristic and repeat `unlock_command`.
    #[default]
    Legacy,
    /// Subscribe to every declared notify binding.
    MultiCharacteristic,
    /// Hand control to [`ScaleAdapter::on_connected`].
    Custom,
}

/// Declarative GATT layout of a vendor protocol.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct ProtocolLayout {
    #[builder(default)]
    pub handshake: HandshakeStyle,
    pub notify: Option<&'static str>,
    pub write: Option<&'static str>,
    pub alt_notify: Option<&'static str>,
    pub alt_write: Option<&'static str>,
    #[builder(default)]
    pub bindings: Vec<CharBinding>,
    #[builder(default)]
    pub unlock_command: Vec<u8>,
    #[builder(default = DEFAULT_UNLOCK_INTERVAL)]
    pub unlock_interval: Duration,
    /// The adapter already emits kilograms regardless of display unit.
    #[builder(default)]
    pub normalizes_weight: bool,
}

impl ProtocolLayout {
    /// Returns the declared notify bindings.
    pub fn notify_bindings(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bindings
            .iter()
            .filter(|binding| binding.kind == BindingKind::Notify)
            .map(|binding| binding.uuid)
    }
}

/// A command an adapter wants written after parsing a notification.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutgoingWrite {
    pub uuid: CharUuid,
    pub payload: Vec<u8>,
    pub with_response: bool,
}

impl OutgoingWrite {
    #[must_use]
    pub fn new(uuid: &str, payload: Vec<u8>) -> Self {
        Self {
            uuid: CharUuid::new(uuid),
            payload,
            with_response: false,
        }
    }

    #[must_use]
    pub fn with_response(mut self) -> Self {
        self.with_response = true;
        self
    }
}

/// Live-connection operations available to a custom handshake.
#[async_trait]
pub trait HandshakeContext: Send {
    /// Writes a payload to a characteristic.
    async fn write(
        &mut self,
        uuid: &str,
        payload: &[u8],
        with_response: bool,
    ) -> Result<(), ScaleError>;

    /// Reads a characteristic value.
    async fn read(&mut self, uuid: &str) -> Result<Vec<u8>, ScaleError>;

    /// Subscribes to a characteristic; its notifications reach the adapter parser.
    async fn subscribe(&mut self, uuid: &str) -> Result<(), ScaleError>;

    /// Returns the profile of the user being measured.
    fn profile(&self) -> &UserProfile;
}

/// The contract every vendor protocol implements.
#[async_trait]
pub trait ScaleAdapter: Send + Sync + fmt::Debug {
    /// Short, stable adapter name used in logs and scan listings.
    fn name(&self) -> &'static str;

    /// Returns whether this adapter owns the advertised device.
    ///
    /// Implementations may record protocol sub-variant flags as a side effect.
    fn matches(&mut self, device: &DeviceInfo) -> bool;

    /// GATT layout and handshake style.
    fn layout(&self) -> ProtocolLayout;

    /// Parses a frame from the primary notify characteristic.
    fn parse_notification(&mut self, data: &[u8]) -> Option<Reading>;

    /// Parses a frame from a specific characteristic.
    ///
    /// Single-characteristic protocols keep the default, which ignores the
    /// source.
    fn parse_char_notification(&mut self, source: &CharUuid, data: &[u8]) -> Option<Reading> {
        let _ = source;
        self.parse_notification(data)
    }

    /// Returns whether the reading is final.
    fn is_complete(&self, reading: &Reading) -> bool;

    /// Body-composition fields the scale reported itself.
    fn vendor_composition(&self) -> VendorComposition {
        VendorComposition::default()
    }

    /// Turns a completed reading into the finished payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the reading or profile cannot produce metrics.
    fn compute_metrics(
        &self,
        reading: &Reading,
        profile: &UserProfile,
    ) -> Result<BodyComposition, ScaleError> {
        Ok(metrics::compute(
            reading,
            &self.vendor_composition(),
            profile,
        )?)
    }

    /// Drains commands queued while parsing.
    fn take_outgoing(&mut self) -> Vec<OutgoingWrite> {
        Vec::new()
    }

    /// Runs a vendor handshake on a fresh connection.
    ///
    /// Only called for [`HandshakeStyle::Custom`] layouts.
    ///
    /// # Errors
    ///
    /// Returns an error when a handshake step fails.
    async fn on_connected(&mut self, ctx: &mut dyn HandshakeContext) -> Result<(), ScaleError> {
        let _ = ctx;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::HandshakeContext;
    use crate::error::ScaleError;
    use crate::measurement::{Gender, Reading, UserProfile};
    use crate::uuid::CharUuid;

    /// Handshake context that records every call as a short string.
    #[derive(Debug)]
    pub(crate) struct RecordingContext {
        pub(crate) calls: Vec<String>,
        pub(crate) reads: HashMap<CharUuid, Vec<u8>>,
        pub(crate) profile: UserProfile,
    }

    impl Default for RecordingContext {
        fn default() -> Self {
            Self {
                calls: Vec::new(),
                reads: HashMap::new(),
                profile: UserProfile::builder()
                    .height_cm(180.0)
                    .age_years(30)
                    .gender(Gender::Male)
                    .build(),
            }
        }
    }

    #[async_trait]
    impl HandshakeContext for RecordingContext {
        async fn write(
            &mut self,
            uuid: &str,
            payload: &[u8],
            _with_response: bool,
        ) -> Result<(), ScaleError> {
            self.calls
                .push(format!("write {} {}", CharUuid::new(uuid), hex::encode(payload)));
            Ok(())
        }

        async fn read(&mut self, uuid: &str) -> Result<Vec<u8>, ScaleError> {
            let uuid = CharUuid::new(uuid);
            self.calls.push(format!("read {uuid}"));
            Ok(self.reads.get(&uuid).cloned().unwrap_or_default())
        }

        async fn subscribe(&mut self, uuid: &str) -> Result<(), ScaleError> {
            self.calls.push(format!("subscribe {}", CharUuid::new(uuid)));
            Ok(())
        }

        fn profile(&self) -> &UserProfile {
            &self.profile
        }
    }

    /// Asserts a reading within 1e-6 of the expected weight and impedance.
    #[track_caller]
    pub(crate) fn assert_reading(reading: Option<Reading>, weight: f64, impedance: f64) {
        let reading = reading.expect("frame should produce a reading");
        assert!(
            (reading.weight - weight).abs() < 1e-6,
            "weight {} != {weight}",
            reading.weight
        );
        assert!(
            (reading.impedance - impedance).abs() < 1e-6,
            "impedance {} != {impedance}",
            reading.impedance
        );
    }

    #[track_caller]
    pub(crate) fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("value should be present");
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }
}
