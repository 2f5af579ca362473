//! Observation bookkeeping and the store lifecycle built on it.
//!
//! - [`SubscriptionRegistry`]: which nodes are observed, per channel
//! - [`LifecycleCoordinator`]: subscribe/unsubscribe that keep the log
//!   store open exactly while something is observed
//!
//! # Example
//!
//! ```ignore
//! let coordinator = LifecycleCoordinator::new(GatewayConfig::default(), protocol)?;
//!
//! coordinator.subscribe(Channel::DataChange, "ns=2;i=42")?;   // store opens
//! coordinator.subscribe(Channel::Event, "i=2253")?;
//! coordinator.unsubscribe(Channel::DataChange, "ns=2;i=42")?;
//! coordinator.unsubscribe(Channel::Event, "i=2253")?;         // store closes
//! ```

mod coordinator;
mod registry;
mod types;

pub use coordinator::LifecycleCoordinator;
pub use registry::SubscriptionRegistry;
pub use types::{SubscribeOutcome, UnsubscribeOutcome};
