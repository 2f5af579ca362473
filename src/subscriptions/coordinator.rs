//! Ties registry membership to the log store's open/closed state.

use crate::config::GatewayConfig;
use crate::error::{Result, SubscribeError, UnsubscribeError};
use crate::protocol::{NotificationHandler, ProtocolClient};
use crate::refresh::RecentRefresher;
use crate::router::NotificationRouter;
use crate::store::{PersistentLogStore, RecordSink, StoreStats};
use crate::types::{Channel, LogRecord, NodeIdentity, ObservedNode};
use crate::writer::{RecordWriter, WriterStats};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::registry::SubscriptionRegistry;
use super::types::{SubscribeOutcome, UnsubscribeOutcome};

/// State guarded by the control lock.
struct ControlState {
    shut_down: bool,
}

/// Subscribe/unsubscribe with the store lifecycle built in.
///
/// The store is open exactly when at least one node is observed on either
/// channel. Every operation that changes membership runs under one control
/// lock, so the membership change and the open/close decision that follows
/// it form a single critical section.
pub struct LifecycleCoordinator {
    control: Mutex<ControlState>,
    /// Path used on the next open, shared with the display refresh.
    store_path: Arc<RwLock<PathBuf>>,
    protocol: Arc<dyn ProtocolClient>,
    registry: Arc<RwLock<SubscriptionRegistry>>,
    store: Arc<PersistentLogStore>,
    writer: Arc<RecordWriter>,
    router: Arc<NotificationRouter>,
    drain_timeout: Duration,
    refresh_interval: Duration,
    refresh_limit: usize,
}

impl LifecycleCoordinator {
    /// Build the store, writer thread and router. Nothing is opened yet.
    pub fn new(config: GatewayConfig, protocol: Arc<dyn ProtocolClient>) -> Result<Self> {
        let store = Arc::new(PersistentLogStore::with_sync_interval(config.sync_interval));
        let sink: Arc<dyn RecordSink> = store.clone();
        let writer = Arc::new(RecordWriter::spawn(sink, config.queue_capacity)?);
        let registry = Arc::new(RwLock::new(SubscriptionRegistry::new()));
        let router = Arc::new(NotificationRouter::new(
            Arc::clone(&registry),
            Arc::clone(&writer),
            config.source_tag.clone(),
        ));

        Ok(Self {
            control: Mutex::new(ControlState { shut_down: false }),
            store_path: Arc::new(RwLock::new(config.store_path.clone())),
            protocol,
            registry,
            store,
            writer,
            router,
            drain_timeout: config.drain_timeout(),
            refresh_interval: config.refresh_interval(),
            refresh_limit: config.refresh_limit,
        })
    }

    /// Start observing `node` on `channel`.
    ///
    /// Opens the store first if this is the first observed node. On any
    /// failure the registry and store are restored to their state before
    /// the call.
    pub fn subscribe(
        &self,
        channel: Channel,
        node: impl Into<NodeIdentity>,
    ) -> std::result::Result<SubscribeOutcome, SubscribeError> {
        let node = node.into();
        let state = self.control.lock();
        if state.shut_down {
            return Err(SubscribeError::ShutDown);
        }

        let (already, first) = {
            let registry = self.registry.read();
            (registry.contains(channel, &node), registry.is_empty())
        };
        if already {
            debug!(channel = %channel, node = %node, "already subscribed");
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        if first && !self.store.is_open() {
            let path = self.store_path();
            if let Err(e) = self.store.open(&path) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot open log store; subscribe aborted"
                );
                return Err(SubscribeError::StoreUnavailable(e));
            }
        }

        self.registry.write().add(channel, node.clone());

        let handler: Arc<dyn NotificationHandler> = self.router.clone();
        if let Err(e) = self.protocol.subscribe(channel, &node, handler) {
            self.registry.write().remove(channel, &node);
            let now_empty = self.registry.read().is_empty();
            if now_empty {
                self.close_store();
            }
            warn!(channel = %channel, node = %node, error = %e, "protocol subscribe failed; rolled back");
            return Err(SubscribeError::ProtocolSubscribeFailure(e));
        }

        info!(channel = %channel, node = %node, "subscribed");
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Stop observing `node` on `channel`. Closes the store when the last
    /// observed node goes away.
    ///
    /// An absent node is a no-op. A protocol failure is reported, but the
    /// node is no longer observed either way.
    pub fn unsubscribe(
        &self,
        channel: Channel,
        node: impl Into<NodeIdentity>,
    ) -> std::result::Result<UnsubscribeOutcome, UnsubscribeError> {
        let node = node.into();
        let _state = self.control.lock();

        let removed = self.registry.write().remove(channel, &node);
        if !removed {
            debug!(channel = %channel, node = %node, "not subscribed; nothing to do");
            return Ok(UnsubscribeOutcome::NotSubscribed);
        }

        let protocol_result = self.protocol.unsubscribe(channel, &node);

        let now_empty = self.registry.read().is_empty();
        if now_empty {
            self.close_store();
        }

        match protocol_result {
            Ok(()) => {
                info!(channel = %channel, node = %node, "unsubscribed");
                Ok(UnsubscribeOutcome::Unsubscribed)
            }
            Err(e) => {
                warn!(channel = %channel, node = %node, error = %e, "protocol unsubscribe failed");
                Err(UnsubscribeError::ProtocolUnsubscribeFailure(e))
            }
        }
    }

    /// Server link dropped: forget every observed node without protocol
    /// calls, drain pending writes and close the store.
    pub fn disconnect(&self) {
        let _state = self.control.lock();
        let cleared: usize = {
            let mut registry = self.registry.write();
            Channel::ALL.iter().map(|&c| registry.clear(c)).sum()
        };
        self.close_store();
        info!(cleared, "disconnected; all observations cleared");
    }

    /// Drain pending writes (bounded by the drain timeout), close the store
    /// whatever the registry holds, and stop the writer. Later subscribes
    /// fail with [`SubscribeError::ShutDown`]. Idempotent.
    ///
    /// Bounded by about twice the drain timeout. A write stuck in the file
    /// system leaves the store open until it is dropped.
    pub fn shutdown(&self) {
        let mut state = self.control.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;

        self.writer.shutdown(self.drain_timeout);
        self.store.close_within(self.drain_timeout);
        info!("recorder shut down");
    }

    fn close_store(&self) {
        if !self.store.is_open() {
            return;
        }
        if !self.writer.flush(self.drain_timeout) {
            warn!(
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "write queue not drained before close"
            );
        }
        self.store.close();
    }

    // --- Configuration ---

    /// Change the log location. Takes effect on the next open; an open
    /// store is left alone.
    pub fn set_store_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!(path = %path.display(), "log store path updated");
        *self.store_path.write() = path;
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path.read().clone()
    }

    /// Server URI stamped on records from now on.
    pub fn set_source_tag(&self, tag: impl Into<String>) {
        self.router.set_source_tag(tag);
    }

    // --- Queries ---

    pub fn is_store_open(&self) -> bool {
        self.store.is_open()
    }

    pub fn observed_count(&self) -> usize {
        self.registry.read().total_count()
    }

    pub fn is_observed(&self, channel: Channel, node: &NodeIdentity) -> bool {
        self.registry.read().contains(channel, node)
    }

    /// Nodes observed on `channel`, sorted.
    pub fn observed(&self, channel: Channel) -> Vec<NodeIdentity> {
        self.registry.read().nodes(channel)
    }

    pub fn observed_nodes(&self) -> Vec<ObservedNode> {
        self.registry.read().observed()
    }

    /// Whether the store's open state matches registry membership. Always
    /// true between operations.
    pub fn is_consistent(&self) -> bool {
        let state = self.control.lock();
        state.shut_down || self.store.is_open() == !self.registry.read().is_empty()
    }

    /// Newest records first, for passive display. Reads the configured path
    /// when the store is closed. Failures yield an empty list.
    pub fn read_recent(&self, limit: usize) -> Vec<LogRecord> {
        let path = self.store_path();
        self.store.read_recent_at(&path, limit)
    }

    pub fn try_read_recent(&self, limit: usize) -> Result<Vec<LogRecord>> {
        let path = self.store_path();
        self.store.try_read_recent_at(&path, limit)
    }

    /// Start the passive display refresh using the configured cadence and
    /// limit. Each tick reads the current store path, so a later
    /// `set_store_path` is picked up while the store is closed.
    pub fn start_display_refresh<F>(&self, on_refresh: F) -> std::io::Result<RecentRefresher>
    where
        F: FnMut(Vec<LogRecord>) + Send + 'static,
    {
        RecentRefresher::spawn(
            self.store(),
            Arc::clone(&self.store_path),
            self.refresh_interval,
            self.refresh_limit,
            on_refresh,
        )
    }

    /// Wait for queued writes to land. Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.writer.flush(timeout)
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// The notification handler handed to the protocol layer.
    pub fn router(&self) -> Arc<NotificationRouter> {
        Arc::clone(&self.router)
    }

    pub fn store(&self) -> Arc<PersistentLogStore> {
        Arc::clone(&self.store)
    }

    /// Open path of the store, if open.
    pub fn open_path(&self) -> Option<PathBuf> {
        self.store.path()
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
