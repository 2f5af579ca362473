//! Shared fixtures for integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use ua_recorder::{
    Channel, DataChange, DeliveryTimestamps, EventNotification, GatewayConfig,
    LifecycleCoordinator, NodeIdentity, NotificationHandler, ProtocolClient, ProtocolError,
    Timestamp,
};

static INIT: Once = Once::new();

/// Route recorder logs to the test writer. `RUST_LOG` overrides the filter.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("warn,ua_recorder=debug")),
            )
            .with_test_writer()
            .init();
    });
}

/// In-memory protocol layer. Keeps the handler of every live subscription
/// so tests can fire deliveries at it.
#[derive(Default)]
pub struct MockProtocol {
    handlers: Mutex<HashMap<(Channel, NodeIdentity), Arc<dyn NotificationHandler>>>,
    reject_subscribe: Mutex<HashSet<String>>,
    reject_unsubscribe: Mutex<HashSet<String>>,
    pub subscribe_calls: AtomicUsize,
    pub unsubscribe_calls: AtomicUsize,
}

impl MockProtocol {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_subscribe(&self, node: &str) {
        self.reject_subscribe.lock().insert(node.to_string());
    }

    pub fn reject_unsubscribe(&self, node: &str) {
        self.reject_unsubscribe.lock().insert(node.to_string());
    }

    pub fn subscribes(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn handler(&self, channel: Channel, node: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.handlers.lock().get(&(channel, node.into())).cloned()
    }

    /// Deliver a value change. Returns false if nothing is subscribed.
    pub fn deliver_value(&self, node: &str, value: serde_json::Value, source_ts: i64) -> bool {
        match self.handler(Channel::DataChange, node) {
            Some(handler) => {
                handler.on_value_change(value_change(node, value, source_ts));
                true
            }
            None => false,
        }
    }

    /// Deliver an event. Returns false if nothing is subscribed.
    pub fn deliver_event(&self, node: &str, fields: serde_json::Value, source_ts: i64) -> bool {
        match self.handler(Channel::Event, node) {
            Some(handler) => {
                handler.on_event(EventNotification {
                    node: node.into(),
                    fields,
                    timestamps: DeliveryTimestamps::source(Timestamp(source_ts)),
                });
                true
            }
            None => false,
        }
    }

    fn do_subscribe(
        &self,
        channel: Channel,
        node: &NodeIdentity,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), ProtocolError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_subscribe.lock().contains(node.as_str()) {
            return Err(ProtocolError::new("BadNodeIdUnknown"));
        }
        self.handlers.lock().insert((channel, node.clone()), handler);
        Ok(())
    }

    fn do_unsubscribe(&self, channel: Channel, node: &NodeIdentity) -> Result<(), ProtocolError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().remove(&(channel, node.clone()));
        if self.reject_unsubscribe.lock().contains(node.as_str()) {
            return Err(ProtocolError::new("BadSubscriptionIdInvalid"));
        }
        Ok(())
    }
}

impl ProtocolClient for MockProtocol {
    fn subscribe_data_change(
        &self,
        node: &NodeIdentity,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), ProtocolError> {
        self.do_subscribe(Channel::DataChange, node, handler)
    }

    fn unsubscribe_data_change(&self, node: &NodeIdentity) -> Result<(), ProtocolError> {
        self.do_unsubscribe(Channel::DataChange, node)
    }

    fn subscribe_events(
        &self,
        node: &NodeIdentity,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), ProtocolError> {
        self.do_subscribe(Channel::Event, node, handler)
    }

    fn unsubscribe_events(&self, node: &NodeIdentity) -> Result<(), ProtocolError> {
        self.do_unsubscribe(Channel::Event, node)
    }
}

pub fn value_change(node: &str, value: serde_json::Value, source_ts: i64) -> DataChange {
    DataChange {
        node: node.into(),
        display_name: Some(format!("Display {}", node)),
        value,
        value_type: "Double".to_string(),
        timestamps: DeliveryTimestamps::source(Timestamp(source_ts)),
    }
}

pub fn test_config(dir: &TempDir) -> GatewayConfig {
    GatewayConfig {
        store_path: dir.path().join("opcua.uclog"),
        source_tag: "opc.tcp://localhost:4840".to_string(),
        sync_interval: 1,
        ..Default::default()
    }
}

pub fn test_coordinator(dir: &TempDir) -> (LifecycleCoordinator, Arc<MockProtocol>) {
    init_test_logging();
    let protocol = MockProtocol::new();
    let coordinator = LifecycleCoordinator::new(test_config(dir), protocol.clone()).unwrap();
    (coordinator, protocol)
}

pub fn reading(v: f64) -> serde_json::Value {
    json!(v)
}
