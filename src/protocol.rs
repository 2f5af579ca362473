//! Seam to the OPC-UA protocol layer.
//!
//! The wire protocol lives elsewhere. This module only names what the
//! recorder needs from it: per-node subscribe/unsubscribe on the two
//! channels, and callbacks for the notifications it delivers.

use crate::error::ProtocolError;
use crate::types::{Channel, DeliveryTimestamps, NodeIdentity};
use std::sync::Arc;

/// A raw data-change delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct DataChange {
    pub node: NodeIdentity,
    /// Browse display name, if the protocol layer resolved one.
    pub display_name: Option<String>,
    pub value: serde_json::Value,
    /// Variant type name, e.g. `Double`.
    pub value_type: String,
    pub timestamps: DeliveryTimestamps,
}

/// A raw event delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct EventNotification {
    /// Node the event subscription was created on.
    pub node: NodeIdentity,
    /// Event fields as delivered.
    pub fields: serde_json::Value,
    pub timestamps: DeliveryTimestamps,
}

/// Receives notifications on the protocol layer's delivery threads.
///
/// Implementations must return quickly and must not panic.
pub trait NotificationHandler: Send + Sync {
    fn on_value_change(&self, change: DataChange);
    fn on_event(&self, event: EventNotification);
}

/// Subscription operations the protocol layer must provide.
pub trait ProtocolClient: Send + Sync {
    fn subscribe_data_change(
        &self,
        node: &NodeIdentity,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), ProtocolError>;

    fn unsubscribe_data_change(&self, node: &NodeIdentity) -> Result<(), ProtocolError>;

    fn subscribe_events(
        &self,
        node: &NodeIdentity,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), ProtocolError>;

    fn unsubscribe_events(&self, node: &NodeIdentity) -> Result<(), ProtocolError>;

    /// Dispatch to the subscribe call for `channel`.
    fn subscribe(
        &self,
        channel: Channel,
        node: &NodeIdentity,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), ProtocolError> {
        match channel {
            Channel::DataChange => self.subscribe_data_change(node, handler),
            Channel::Event => self.subscribe_events(node, handler),
        }
    }

    /// Dispatch to the unsubscribe call for `channel`.
    fn unsubscribe(&self, channel: Channel, node: &NodeIdentity) -> Result<(), ProtocolError> {
        match channel {
            Channel::DataChange => self.unsubscribe_data_change(node),
            Channel::Event => self.unsubscribe_events(node),
        }
    }
}
