//! Routes protocol notifications to the writer queue.

use crate::protocol::{DataChange, EventNotification, NotificationHandler};
use crate::subscriptions::SubscriptionRegistry;
use crate::types::{Channel, EventRecord, LogRecord, NodeIdentity, ValueSample};
use crate::writer::RecordWriter;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Normalizes raw deliveries into records and queues them for writing.
///
/// Runs on the protocol layer's delivery threads. It never touches the
/// store directly and never blocks on I/O.
pub struct NotificationRouter {
    registry: Arc<RwLock<SubscriptionRegistry>>,
    writer: Arc<RecordWriter>,
    /// Server URI stamped on each record.
    source_tag: RwLock<String>,
    dropped_unobserved: AtomicU64,
}

impl NotificationRouter {
    pub fn new(
        registry: Arc<RwLock<SubscriptionRegistry>>,
        writer: Arc<RecordWriter>,
        source_tag: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            writer,
            source_tag: RwLock::new(source_tag.into()),
            dropped_unobserved: AtomicU64::new(0),
        }
    }

    pub fn set_source_tag(&self, tag: impl Into<String>) {
        *self.source_tag.write() = tag.into();
    }

    pub fn source_tag(&self) -> String {
        self.source_tag.read().clone()
    }

    /// Notifications discarded because their node was not observed.
    pub fn dropped_unobserved(&self) -> u64 {
        self.dropped_unobserved.load(Ordering::Relaxed)
    }

    /// Queue `record` if `node` is observed on `channel`.
    ///
    /// The registry read lock is held across the check and the enqueue, so
    /// an accepted record is always queued ahead of the close that follows
    /// its node's removal.
    fn route(&self, channel: Channel, node: &NodeIdentity, build: impl FnOnce() -> LogRecord) {
        let registry = self.registry.read();
        if !registry.contains(channel, node) {
            self.dropped_unobserved.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %channel, node = %node, "notification for unobserved node dropped");
            return;
        }
        self.writer.submit(build());
    }
}

impl NotificationHandler for NotificationRouter {
    fn on_value_change(&self, change: DataChange) {
        let source_tag = self.source_tag();
        let DataChange {
            node,
            display_name,
            value,
            value_type,
            timestamps,
        } = change;

        self.route(Channel::DataChange, &node, || {
            LogRecord::Sample(ValueSample {
                timestamp: timestamps.resolve(),
                node_id: node.as_str().to_string(),
                display_name: display_name.unwrap_or_else(|| node.as_str().to_string()),
                value: render_value(&value),
                value_type,
                source_tag,
            })
        });
    }

    fn on_event(&self, event: EventNotification) {
        let source_tag = self.source_tag();
        let EventNotification {
            node,
            fields,
            timestamps,
        } = event;

        self.route(Channel::Event, &node, || {
            LogRecord::Event(EventRecord {
                timestamp: timestamps.resolve(),
                event: fields.to_string(),
                source_tag,
            })
        });
    }
}

/// Strings are kept verbatim; everything else is compact JSON.
fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::store::RecordSink;
    use crate::types::{DeliveryTimestamps, Timestamp};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<LogRecord>>,
    }

    impl RecordSink for MemorySink {
        fn write_sample(&self, sample: &ValueSample) -> Result<()> {
            self.records.lock().push(LogRecord::Sample(sample.clone()));
            Ok(())
        }

        fn write_event(&self, event: &EventRecord) -> Result<()> {
            self.records.lock().push(LogRecord::Event(event.clone()));
            Ok(())
        }
    }

    fn setup() -> (
        Arc<RwLock<SubscriptionRegistry>>,
        Arc<RecordWriter>,
        Arc<MemorySink>,
        NotificationRouter,
    ) {
        let registry = Arc::new(RwLock::new(SubscriptionRegistry::new()));
        let sink = Arc::new(MemorySink::default());
        let writer = Arc::new(RecordWriter::spawn(sink.clone(), None).unwrap());
        let router = NotificationRouter::new(registry.clone(), writer.clone(), "opc.tcp://plc:4840");
        (registry, writer, sink, router)
    }

    fn change(node: &str, value: serde_json::Value) -> DataChange {
        DataChange {
            node: node.into(),
            display_name: None,
            value,
            value_type: "Double".to_string(),
            timestamps: DeliveryTimestamps::source(Timestamp(100)),
        }
    }

    #[test]
    fn test_value_change_becomes_sample() {
        let (registry, writer, sink, router) = setup();
        registry.write().add(Channel::DataChange, "ns=2;i=42".into());

        router.on_value_change(DataChange {
            display_name: Some("Temperature".to_string()),
            ..change("ns=2;i=42", json!(21.5))
        });
        assert!(writer.flush(Duration::from_secs(5)));

        let records = sink.records.lock();
        assert_eq!(
            records[0],
            LogRecord::Sample(ValueSample {
                timestamp: Timestamp(100),
                node_id: "ns=2;i=42".to_string(),
                display_name: "Temperature".to_string(),
                value: "21.5".to_string(),
                value_type: "Double".to_string(),
                source_tag: "opc.tcp://plc:4840".to_string(),
            })
        );
    }

    #[test]
    fn test_unobserved_node_is_dropped() {
        let (registry, writer, sink, router) = setup();
        registry.write().add(Channel::Event, "A".into());

        // Observed on events only
        router.on_value_change(change("A", json!(1)));
        assert!(writer.flush(Duration::from_secs(5)));

        assert!(sink.records.lock().is_empty());
        assert_eq!(router.dropped_unobserved(), 1);
    }

    #[test]
    fn test_event_rendered_as_json() {
        let (registry, writer, sink, router) = setup();
        registry.write().add(Channel::Event, "i=2253".into());
        router.set_source_tag("opc.tcp://other:4840");

        router.on_event(EventNotification {
            node: "i=2253".into(),
            fields: json!({"Message": "Overheat", "Severity": 800}),
            timestamps: DeliveryTimestamps {
                source: None,
                server: Some(Timestamp(7)),
            },
        });
        assert!(writer.flush(Duration::from_secs(5)));

        let records = sink.records.lock();
        let event = records[0].as_event().unwrap();
        assert_eq!(event.timestamp, Timestamp(7));
        assert_eq!(event.source_tag, "opc.tcp://other:4840");
        let parsed: serde_json::Value = serde_json::from_str(&event.event).unwrap();
        assert_eq!(parsed["Severity"], 800);
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("running")), "running");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!([1, 2])), "[1,2]");
    }
}
