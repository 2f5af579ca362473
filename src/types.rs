//! Core types for the recorder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Notification kind a node is observed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    DataChange,
    Event,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::DataChange, Channel::Event];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::DataChange => write!(f, "data_change"),
            Channel::Event => write!(f, "event"),
        }
    }
}

/// Stable reference to a server-side node, e.g. `ns=2;i=42`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        NodeIdentity(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeIdentity {
    fn from(s: &str) -> Self {
        NodeIdentity(s.to_string())
    }
}

impl From<String> for NodeIdentity {
    fn from(s: String) -> Self {
        NodeIdentity(s)
    }
}

/// A node observed on one channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObservedNode {
    pub channel: Channel,
    pub node: NodeIdentity,
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. A clock set before the epoch reads as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    pub fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Timestamps attached to a delivery by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryTimestamps {
    pub source: Option<Timestamp>,
    pub server: Option<Timestamp>,
}

impl DeliveryTimestamps {
    pub fn source(ts: Timestamp) -> Self {
        Self {
            source: Some(ts),
            server: None,
        }
    }

    /// Source timestamp, else server timestamp, else local capture time.
    pub fn resolve(&self) -> Timestamp {
        self.source.or(self.server).unwrap_or_else(Timestamp::now)
    }
}

/// A single persisted value change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSample {
    pub timestamp: Timestamp,
    pub node_id: String,
    pub display_name: String,
    /// Value rendered as text.
    pub value: String,
    pub value_type: String,
    /// Server the sample came from.
    pub source_tag: String,
}

/// A single persisted event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: Timestamp,
    /// Event fields rendered as compact JSON.
    pub event: String,
    pub source_tag: String,
}

/// Discriminant for the two record streams in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Sample,
    Event,
}

impl RecordKind {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            RecordKind::Sample => 0,
            RecordKind::Event => 1,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordKind::Sample),
            1 => Some(RecordKind::Event),
            _ => None,
        }
    }
}

/// Either kind of record, as read back from the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
    Sample(ValueSample),
    Event(EventRecord),
}

impl LogRecord {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            LogRecord::Sample(s) => s.timestamp,
            LogRecord::Event(e) => e.timestamp,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            LogRecord::Sample(_) => RecordKind::Sample,
            LogRecord::Event(_) => RecordKind::Event,
        }
    }

    pub fn as_sample(&self) -> Option<&ValueSample> {
        match self {
            LogRecord::Sample(s) => Some(s),
            LogRecord::Event(_) => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventRecord> {
        match self {
            LogRecord::Event(e) => Some(e),
            LogRecord::Sample(_) => None,
        }
    }
}

impl From<ValueSample> for LogRecord {
    fn from(s: ValueSample) -> Self {
        LogRecord::Sample(s)
    }
}

impl From<EventRecord> for LogRecord {
    fn from(e: EventRecord) -> Self {
        LogRecord::Event(e)
    }
}
