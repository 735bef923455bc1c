use async_trait::async_trait;
use tokio::sync::mpsc;

use super::CharacteristicMap;
use crate::error::ScaleError;
use crate::uuid::CharUuid;

/// GATT write mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Something that happened on a live connection.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LinkEvent {
    Notification { source: CharUuid, value: Vec<u8> },
    Disconnected,
}

/// Receiving half of a connection's event stream.
///
/// The stream closing is treated like [`LinkEvent::Disconnected`].
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// The GATT operations the dispatch engine needs from a connected device.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Characteristics discovered on this connection.
    fn characteristics(&self) -> &CharacteristicMap;

    /// Enables notifications; values arrive as [`LinkEvent::Notification`].
    async fn subscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError>;

    async fn unsubscribe(&self, uuid: &CharUuid) -> Result<(), ScaleError>;

    async fn write(&self, uuid: &CharUuid, payload: &[u8], mode: WriteMode)
    -> Result<(), ScaleError>;

    async fn read(&self, uuid: &CharUuid) -> Result<Vec<u8>, ScaleError>;
}
