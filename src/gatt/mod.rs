//! Backend-agnostic GATT plumbing: the per-connection characteristic map,
//! the link trait every backend implements, and the notification dispatch
//! engine that drives a [`ScaleAdapter`](crate::adapters::ScaleAdapter).

mod characteristic_map;
mod dispatch;
mod link;

pub use self::characteristic_map::{Capabilities, CharacteristicMap, LegacyPair};
pub use self::dispatch::{Dispatch, LiveDataCallback};
pub use self::link::{GattLink, LinkEvent, LinkEvents, WriteMode};
