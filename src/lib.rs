//! # UA Recorder
//!
//! Subscription lifecycle and persistence gateway for an OPC-UA client.
//! Tracks which server nodes are observed for data changes or events, keeps
//! an append-only log file open exactly while anything is observed, and
//! turns notifications arriving on protocol delivery threads into ordered
//! log writes.
//!
//! ## Core Concepts
//!
//! - **Registry**: per-channel set of observed nodes
//! - **Coordinator**: subscribe/unsubscribe with the store open/close
//!   policy built in
//! - **Router**: notification handler that normalizes deliveries and queues
//!   them without blocking
//! - **Writer**: single consumer thread that owns all store writes
//! - **Store**: the one open log file, with newest-first reads for display
//!
//! ## Example
//!
//! ```ignore
//! use ua_recorder::{Channel, GatewayConfig, LifecycleCoordinator};
//!
//! let coordinator = LifecycleCoordinator::new(GatewayConfig::default(), protocol)?;
//! coordinator.set_source_tag("opc.tcp://plc:4840");
//!
//! coordinator.subscribe(Channel::DataChange, "ns=2;i=42")?;
//! // ... notifications flow into the log ...
//! for record in coordinator.read_recent(10) {
//!     println!("{:?}", record);
//! }
//! coordinator.unsubscribe(Channel::DataChange, "ns=2;i=42")?;
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod records;
pub mod refresh;
pub mod router;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod writer;

// Re-exports
pub use config::GatewayConfig;
pub use error::{ConfigError, ProtocolError, Result, StoreError, SubscribeError, UnsubscribeError};
pub use protocol::{DataChange, EventNotification, NotificationHandler, ProtocolClient};
pub use records::RecordLog;
pub use refresh::RecentRefresher;
pub use router::NotificationRouter;
pub use store::{PersistentLogStore, RecordSink, StoreStats};
pub use subscriptions::{
    LifecycleCoordinator, SubscribeOutcome, SubscriptionRegistry, UnsubscribeOutcome,
};
pub use types::*;
pub use writer::{RecordWriter, WriterStats};
