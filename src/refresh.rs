//! Periodic passive refresh of recent records for display.

use crate::store::PersistentLogStore;
use crate::types::LogRecord;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Background thread that polls `read_recent` on a fixed cadence.
///
/// The callback gets an empty list when nothing has been recorded yet.
/// Read failures are logged by the store and also show up as an empty
/// list; the refresh never influences the store's lifecycle.
pub struct RecentRefresher {
    stop: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecentRefresher {
    /// Refresh immediately, then every `interval`. `path` is read on every
    /// tick and used when the store is closed.
    pub fn spawn<F>(
        store: Arc<PersistentLogStore>,
        path: Arc<RwLock<PathBuf>>,
        interval: Duration,
        limit: usize,
        mut on_refresh: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut(Vec<LogRecord>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let join = thread::Builder::new()
            .name("ua-log-refresh".into())
            .spawn(move || loop {
                let current = path.read().clone();
                let records = store.read_recent_at(&current, limit);
                debug!(count = records.len(), "display refresh");
                on_refresh(records);

                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            stop: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(join)),
        })
    }

    /// Stop refreshing and wait for the thread. Idempotent.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.worker.lock().take() {
            if join.join().is_err() {
                warn!("refresh callback panicked");
            }
        }
    }
}

impl Drop for RecentRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}
