//! Persistent log store: owns the single open record log.
//!
//! The store knows how to open, close, write and read. It has no opinion
//! on *when* it should be open; that policy lives in
//! [`LifecycleCoordinator`](crate::subscriptions::LifecycleCoordinator).

use crate::error::{Result, StoreError};
use crate::records::RecordLog;
use crate::types::{EventRecord, LogRecord, ValueSample};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Destination for normalized records.
///
/// The writer thread only sees this trait, so a sink can be swapped out in
/// tests without touching the lifecycle code.
pub trait RecordSink: Send + Sync {
    fn write_sample(&self, sample: &ValueSample) -> Result<()>;
    fn write_event(&self, event: &EventRecord) -> Result<()>;

    fn write(&self, record: &LogRecord) -> Result<()> {
        match record {
            LogRecord::Sample(s) => self.write_sample(s),
            LogRecord::Event(e) => self.write_event(e),
        }
    }
}

/// Point-in-time view of the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub open: bool,
    pub path: Option<PathBuf>,
    pub record_count: usize,
    pub size_bytes: u64,
}

/// The process-wide log store. At most one log file is open at a time.
pub struct PersistentLogStore {
    log: Mutex<Option<RecordLog>>,
    /// Path of the most recently opened log, kept after close for
    /// passive reads.
    last_path: Mutex<Option<PathBuf>>,
    /// Read-only handle reused by passive reads while closed.
    follower: Mutex<Option<RecordLog>>,
    sync_interval: u64,
}

impl PersistentLogStore {
    pub fn new() -> Self {
        Self::with_sync_interval(RecordLog::DEFAULT_SYNC_INTERVAL)
    }

    pub fn with_sync_interval(sync_interval: u64) -> Self {
        Self {
            log: Mutex::new(None),
            last_path: Mutex::new(None),
            follower: Mutex::new(None),
            sync_interval,
        }
    }

    /// Open the log at `path`, creating it if absent.
    ///
    /// Opening the path that is already open is a no-op. Opening a different
    /// path closes the current log first.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut guard = self.log.lock();

        if let Some(current) = guard.as_ref() {
            if current.path() == path {
                return Ok(());
            }
        }
        if let Some(previous) = guard.take() {
            Self::close_log(previous);
        }

        self.follower.lock().take();
        let log = RecordLog::open(path, self.sync_interval)?;
        info!(path = %path.display(), records = log.len(), "log store opened");
        *guard = Some(log);
        *self.last_path.lock() = Some(path.to_path_buf());
        Ok(())
    }

    /// Close the log. Safe to call when nothing is open.
    pub fn close(&self) {
        if let Some(log) = self.log.lock().take() {
            Self::close_log(log);
        }
    }

    /// Like [`close`](Self::close), but gives up if a write still holds
    /// the log after `timeout`. Returns whether the store ended closed.
    pub fn close_within(&self, timeout: Duration) -> bool {
        match self.log.try_lock_for(timeout) {
            Some(mut guard) => {
                if let Some(log) = guard.take() {
                    Self::close_log(log);
                }
                true
            }
            None => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "log store busy with a write; close abandoned"
                );
                false
            }
        }
    }

    fn close_log(mut log: RecordLog) {
        if let Err(e) = log.sync() {
            warn!(path = %log.path().display(), error = %e, "sync on close failed");
        }
        info!(path = %log.path().display(), "log store closed");
    }

    pub fn is_open(&self) -> bool {
        self.log.lock().is_some()
    }

    /// Path of the open log, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.log.lock().as_ref().map(|l| l.path().to_path_buf())
    }

    /// Append one value sample.
    pub fn write_sample(&self, sample: &ValueSample) -> Result<()> {
        self.append(&LogRecord::Sample(sample.clone()))
    }

    /// Append one event.
    pub fn write_event(&self, event: &EventRecord) -> Result<()> {
        self.append(&LogRecord::Event(event.clone()))
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let mut guard = self.log.lock();
        let log = guard.as_mut().ok_or(StoreError::NotOpen)?;
        log.append(record)?;
        Ok(())
    }

    /// Newest records first. Reads the open log, or the last opened path
    /// read-only when closed.
    pub fn try_read_recent(&self, limit: usize) -> Result<Vec<LogRecord>> {
        let fallback = self.last_path.lock().clone();
        match fallback {
            Some(path) => self.try_read_recent_at(&path, limit),
            None => {
                let mut guard = self.log.lock();
                match guard.as_mut() {
                    Some(log) => log.read_recent(limit),
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    /// Like [`try_read_recent`](Self::try_read_recent), but falls back to
    /// `path` when the store is closed. A missing file yields no records.
    ///
    /// The read-only handle is kept between calls and only scans frames
    /// appended since the previous read.
    pub fn try_read_recent_at(&self, path: &Path, limit: usize) -> Result<Vec<LogRecord>> {
        {
            let mut guard = self.log.lock();
            if let Some(log) = guard.as_mut() {
                return log.read_recent(limit);
            }
        }

        let mut follower = self.follower.lock();
        if !path.exists() {
            *follower = None;
            return Ok(Vec::new());
        }

        let mut reader = match follower.take() {
            Some(mut reader) if reader.path() == path => {
                reader.refresh()?;
                reader
            }
            _ => RecordLog::open_read_only(path)?,
        };
        let records = reader.read_recent(limit)?;
        *follower = Some(reader);
        Ok(records)
    }

    /// Best-effort read for passive display. Failures are logged and
    /// reported as an empty result.
    pub fn read_recent(&self, limit: usize) -> Vec<LogRecord> {
        self.try_read_recent(limit).unwrap_or_else(|e| {
            warn!(error = %e, "read_recent failed");
            Vec::new()
        })
    }

    /// Best-effort variant of [`try_read_recent_at`](Self::try_read_recent_at).
    pub fn read_recent_at(&self, path: &Path, limit: usize) -> Vec<LogRecord> {
        self.try_read_recent_at(path, limit).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "read_recent failed");
            Vec::new()
        })
    }

    pub fn stats(&self) -> StoreStats {
        let guard = self.log.lock();
        match guard.as_ref() {
            Some(log) => StoreStats {
                open: true,
                path: Some(log.path().to_path_buf()),
                record_count: log.len(),
                size_bytes: log.size(),
            },
            None => StoreStats {
                open: false,
                path: None,
                record_count: 0,
                size_bytes: 0,
            },
        }
    }
}

impl RecordSink for PersistentLogStore {
    fn write_sample(&self, sample: &ValueSample) -> Result<()> {
        PersistentLogStore::write_sample(self, sample)
    }

    fn write_event(&self, event: &EventRecord) -> Result<()> {
        PersistentLogStore::write_event(self, event)
    }

    fn write(&self, record: &LogRecord) -> Result<()> {
        self.append(record)
    }
}

impl Default for PersistentLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PersistentLogStore {
    fn drop(&mut self) {
        self.close();
    }
}
