use tracing::debug;

use super::{
    ActiveEraAdapter, BeurerSanitasAdapter, DeviceInfo, DigooAdapter, EsCs20mAdapter,
    ExcelvanAdapter, ExingtechAdapter, HesleyAdapter, HoffenAdapter, InlifeAdapter,
    MedisanaAdapter, MgbAdapter, OneByoneAdapter, QnAdapter, RenphoAdapter, ScaleAdapter,
    SanitasSbf72Adapter, SenssunAdapter, SoehnleAdapter, StandardGattAdapter, TrisaAdapter,
    XiaomiAdapter, YunmaiAdapter,
};

type Factory = fn() -> Box<dyn ScaleAdapter>;

fn build<A: ScaleAdapter + Default + 'static>() -> Box<dyn ScaleAdapter> {
    Box::new(A::default())
}

/// Registry order. The first adapter whose `matches` accepts a device wins.
///
/// - `qn` precedes `renpho`: both accept Renpho names, only the QN service
///   (`ffe0`/`fff0`) tells them apart, and `renpho` rejects `ffe0` itself.
/// - `xiaomi`, `sanitas-sbf72` and `soehnle` precede `standard-gatt`: they
///   advertise the SIG weight/body-composition services but need their own
///   handshake or frame layout. `standard-gatt` also excludes their names.
/// - `beurer-sanitas` and `yunmai` precede the generic `ffe0` users.
/// - `standard-gatt` is the catch-all and stays last.
const ENTRIES: [(&str, Factory); 21] = [
    ("qn", build::<QnAdapter>),
    ("renpho", build::<RenphoAdapter>),
    ("es-cs20m", build::<EsCs20mAdapter>),
    ("xiaomi", build::<XiaomiAdapter>),
    ("yunmai", build::<YunmaiAdapter>),
    ("trisa", build::<TrisaAdapter>),
    ("beurer-sanitas", build::<BeurerSanitasAdapter>),
    ("sanitas-sbf72", build::<SanitasSbf72Adapter>),
    ("soehnle", build::<SoehnleAdapter>),
    ("medisana", build::<MedisanaAdapter>),
    ("exingtech", build::<ExingtechAdapter>),
    ("excelvan", build::<ExcelvanAdapter>),
    ("hesley", build::<HesleyAdapter>),
    ("inlife", build::<InlifeAdapter>),
    ("digoo", build::<DigooAdapter>),
    ("1byone", build::<OneByoneAdapter>),
    ("active-era", build::<ActiveEraAdapter>),
    ("mgb", build::<MgbAdapter>),
    ("hoffen", build::<HoffenAdapter>),
    ("senssun", build::<SenssunAdapter>),
    ("standard-gatt", build::<StandardGattAdapter>),
];

/// The ordered set of known vendor adapters.
///
/// The registry holds factories, not instances: every call hands out fresh
/// adapters so no decode state leaks between sessions.
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    entries: Vec<(&'static str, Factory)>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self {
            entries: ENTRIES.to_vec(),
        }
    }
}

impl AdapterRegistry {
    /// Returns a registry limited to the named families, in registry order.
    #[must_use]
    pub fn only(names: &[&str]) -> Self {
        Self {
            entries: ENTRIES
                .iter()
                .filter(|(name, _)| names.contains(name))
                .copied()
                .collect(),
        }
    }

    /// Family names in precedence order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    /// Builds one fresh instance of every adapter, in precedence order.
    #[must_use]
    pub fn instantiate(&self) -> Vec<Box<dyn ScaleAdapter>> {
        self.entries.iter().map(|(_, factory)| factory()).collect()
    }

    /// Returns a fresh adapter for the first family that claims `device`.
    #[must_use]
    pub fn resolve(&self, device: &DeviceInfo) -> Option<Box<dyn ScaleAdapter>> {
        let mut adapters = self.instantiate();
        let index = claim(&mut adapters, device)?;
        Some(adapters.swap_remove(index))
    }

    /// Returns the family name (as accepted by [`AdapterRegistry::only`])
    /// of the adapter that would claim `device`.
    #[must_use]
    pub fn identify(&self, device: &DeviceInfo) -> Option<&'static str> {
        self.entries
            .iter()
            .find_map(|(name, factory)| factory().matches(device).then_some(*name))
    }
}

/// Returns the index of the first adapter in `adapters` that claims `device`.
pub(crate) fn claim(adapters: &mut [Box<dyn ScaleAdapter>], device: &DeviceInfo) -> Option<usize> {
    let index = adapters
        .iter_mut()
        .position(|adapter| adapter.matches(device))?;
    debug!(
        device = device.name(),
        adapter = adapters[index].name(),
        "adapter claimed device"
    );
    Some(index)
}
