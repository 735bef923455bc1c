use std::collections::BTreeMap;

use crate::adapters::ProtocolLayout;
use crate::error::ScaleError;
use crate::uuid::CharUuid;

use super::WriteMode;

/// What a connected characteristic supports.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Capabilities {
    pub subscribe: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub read: bool,
}

impl Capabilities {
    #[must_use]
    pub const fn notify() -> Self {
        Self {
            subscribe: true,
            write: false,
            write_without_response: false,
            read: false,
        }
    }

    #[must_use]
    pub const fn writable() -> Self {
        Self {
            subscribe: false,
            write: true,
            write_without_response: true,
            read: false,
        }
    }

    #[must_use]
    pub const fn readable() -> Self {
        Self {
            subscribe: false,
            write: false,
            write_without_response: false,
            read: true,
        }
    }

    fn union(self, other: Self) -> Self {
        Self {
            subscribe: self.subscribe || other.subscribe,
            write: self.write || other.write,
            write_without_response: self.write_without_response || other.write_without_response,
            read: self.read || other.read,
        }
    }

    /// Short labels for listings, e.g. `notify,write`.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::with_capacity(4);
        if self.subscribe {
            labels.push("notify");
        }
        if self.read {
            labels.push("read");
        }
        if self.write {
            labels.push("write");
        }
        if self.write_without_response {
            labels.push("write-without-response");
        }
        labels
    }
}

/// The notify/write pair a legacy protocol runs on.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LegacyPair {
    pub notify: CharUuid,
    pub write: Option<CharUuid>,
}

/// Characteristics of one connection, keyed by normalized UUID.
///
/// Built once after service discovery and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacteristicMap {
    entries: BTreeMap<CharUuid, Capabilities>,
}

impl CharacteristicMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a characteristic, merging capabilities when it appears in more
    /// than one service.
    pub fn insert(&mut self, uuid: impl Into<CharUuid>, capabilities: Capabilities) {
        self.entries
            .entry(uuid.into())
            .and_modify(|existing| *existing = existing.union(capabilities))
            .or_insert(capabilities);
    }

    /// Looks up a characteristic by any UUID spelling.
    #[must_use]
    pub fn get(&self, uuid: &str) -> Option<Capabilities> {
        self.entries.get(&CharUuid::new(uuid)).copied()
    }

    #[must_use]
    pub fn contains(&self, uuid: &str) -> bool {
        self.get(uuid).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CharUuid, &Capabilities)> {
        self.entries.iter()
    }

    /// Picks the write mode for a characteristic, preferring writes without
    /// response when the characteristic allows them.
    #[must_use]
    pub fn write_mode(&self, uuid: &CharUuid) -> WriteMode {
        match self.entries.get(uuid) {
            Some(capabilities) if capabilities.write_without_response => {
                WriteMode::WithoutResponse
            }
            _ => WriteMode::WithResponse,
        }
    }

    /// Resolves the notify/write pair of a legacy layout.
    ///
    /// The primary pair wins when complete; otherwise the alternate pair is
    /// tried. A write characteristic is only required when the layout
    /// declares one.
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::CharacteristicMissing`] when neither pair
    /// resolves.
    pub fn resolve_legacy(&self, layout: &ProtocolLayout) -> Result<LegacyPair, ScaleError> {
        self.resolve_pair(layout.notify, layout.write)
            .or_else(|| {
                let notify = layout.alt_notify.or(layout.notify);
                let write = layout.alt_write.or(layout.write);
                (layout.alt_notify.is_some() || layout.alt_write.is_some())
                    .then(|| self.resolve_pair(notify, write))
                    .flatten()
            })
            .ok_or_else(|| ScaleError::CharacteristicMissing {
                uuids: [layout.notify, layout.write, layout.alt_notify, layout.alt_write]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    fn resolve_pair(
        &self,
        notify: Option<&'static str>,
        write: Option<&'static str>,
    ) -> Option<LegacyPair> {
        let notify = notify.filter(|uuid| self.contains(uuid))?;
        let write = match write {
            Some(uuid) if self.contains(uuid) => Some(CharUuid::new(uuid)),
            Some(_) => return None,
            None => None,
        };
        Some(LegacyPair {
            notify: CharUuid::new(notify),
            write,
        })
    }
}

impl<U: Into<CharUuid>> FromIterator<(U, Capabilities)> for CharacteristicMap {
    fn from_iter<T: IntoIterator<Item = (U, Capabilities)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (uuid, capabilities) in iter {
            map.insert(uuid, capabilities);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn qn_layout() -> ProtocolLayout {
        ProtocolLayout::builder()
            .notify("ffe1")
            .write("ffe3")
            .alt_notify("fff1")
            .alt_write("fff2")
            .build()
    }

    #[rstest]
    #[case("FFF1")]
    #[case("fff1")]
    #[case("0000fff1-0000-1000-8000-00805f9b34fb")]
    #[case("0000FFF1-0000-1000-8000-00805F9B34FB")]
    fn lookup_accepts_short_and_full_forms(#[case] uuid: &str) {
        let map: CharacteristicMap = [("0000fff1-0000-1000-8000-00805f9b34fb", Capabilities::notify())]
            .into_iter()
            .collect();
        assert_eq!(Some(Capabilities::notify()), map.get(uuid));
    }

    #[test]
    fn duplicate_characteristics_merge_capabilities() {
        let mut map = CharacteristicMap::new();
        map.insert("ffe1", Capabilities::notify());
        map.insert("FFE1", Capabilities::readable());

        assert_eq!(1, map.len());
        let merged = map.get("ffe1").expect("characteristic should be present");
        assert!(merged.subscribe && merged.read);
    }

    #[test]
    fn legacy_pair_prefers_primary() {
        let map: CharacteristicMap = [
            ("ffe1", Capabilities::notify()),
            ("ffe3", Capabilities::writable()),
            ("fff1", Capabilities::notify()),
            ("fff2", Capabilities::writable()),
        ]
        .into_iter()
        .collect();

        let pair = map.resolve_legacy(&qn_layout()).expect("pair should resolve");
        assert_eq!(CharUuid::new("ffe1"), pair.notify);
        assert_eq!(Some(CharUuid::new("ffe3")), pair.write);
    }

    #[test]
    fn legacy_pair_falls_back_to_alternate() {
        let map: CharacteristicMap = [
            ("fff1", Capabilities::notify()),
            ("fff2", Capabilities::writable()),
        ]
        .into_iter()
        .collect();

        let pair = map.resolve_legacy(&qn_layout()).expect("alternate should resolve");
        assert_eq!(CharUuid::new("fff1"), pair.notify);
        assert_eq!(Some(CharUuid::new("fff2")), pair.write);
    }

    #[test]
    fn legacy_pair_without_declared_write_needs_only_notify() {
        let layout = ProtocolLayout::builder().notify("fff1").build();
        let map: CharacteristicMap = [("fff1", Capabilities::notify())].into_iter().collect();

        let pair = map.resolve_legacy(&layout).expect("notify-only layout should resolve");
        assert_eq!(None, pair.write);
    }

    #[test]
    fn legacy_pair_missing_names_every_candidate() {
        let map: CharacteristicMap = [("ffe1", Capabilities::notify())].into_iter().collect();
        let result = map.resolve_legacy(&qn_layout());
        assert_matches!(
            result,
            Err(ScaleError::CharacteristicMissing { uuids }) if uuids == "ffe1, ffe3, fff1, fff2"
        );
    }

    #[rstest]
    #[case(Capabilities::writable(), WriteMode::WithoutResponse)]
    #[case(Capabilities { write: true, ..Capabilities::default() }, WriteMode::WithResponse)]
    fn write_mode_prefers_without_response(
        #[case] capabilities: Capabilities,
        #[case] expected: WriteMode,
    ) {
        let map: CharacteristicMap = [("ffe3", capabilities)].into_iter().collect();
        assert_eq!(expected, map.write_mode(&CharUuid::new("ffe3")));
    }
}
