//! Dedicated writer thread between notification delivery and the store.
//!
//! Delivery threads hand records to [`RecordWriter::submit`], which never
//! blocks. A single consumer thread drains the queue in FIFO order into a
//! [`RecordSink`]. Flush barriers travel through the same queue, so a
//! completed flush means every record submitted before it has been handled.

use crate::error::{Result, StoreError};
use crate::store::RecordSink;
use crate::types::LogRecord;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often an idle writer checks for shutdown.
const IDLE_POLL: Duration = Duration::from_millis(20);

enum WriteCommand {
    Record(LogRecord),
    Flush(Sender<()>),
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    written: AtomicU64,
    write_failures: AtomicU64,
    not_open: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_shutdown: AtomicU64,
}

/// Snapshot of writer counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub submitted: u64,
    pub written: u64,
    /// Records the sink rejected with an I/O or encoding error.
    pub write_failures: u64,
    /// Records that reached a closed store. Nonzero means the open/close
    /// policy let a write slip past a close.
    pub not_open: u64,
    /// Oldest records evicted from a full bounded queue.
    pub dropped_overflow: u64,
    /// Records discarded because shutdown's drain timed out.
    pub dropped_shutdown: u64,
    /// Commands currently queued.
    pub pending: usize,
}

/// Single-consumer writer queue.
pub struct RecordWriter {
    sender: Sender<WriteCommand>,
    /// Kept for bounded queues only, to evict the oldest entry on overflow.
    evictor: Option<Receiver<WriteCommand>>,
    counters: Arc<Counters>,
    /// No new records are accepted once set.
    stopping: Arc<AtomicBool>,
    /// Set when a shutdown drain timed out; queued records are discarded.
    abandon: Arc<AtomicBool>,
    /// Tells an idle worker to exit.
    halt: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecordWriter {
    /// Start the writer thread. `capacity` of `None` means unbounded.
    pub fn spawn(sink: Arc<dyn RecordSink>, capacity: Option<usize>) -> Result<Self> {
        let (sender, receiver) = match capacity {
            Some(cap) => bounded(cap.max(1)),
            None => unbounded(),
        };
        let evictor = capacity.map(|_| receiver.clone());

        let counters = Arc::new(Counters::default());
        let stopping = Arc::new(AtomicBool::new(false));
        let abandon = Arc::new(AtomicBool::new(false));
        let halt = Arc::new(AtomicBool::new(false));

        let worker_counters = Arc::clone(&counters);
        let worker_abandon = Arc::clone(&abandon);
        let worker_halt = Arc::clone(&halt);

        let join = thread::Builder::new()
            .name("ua-log-writer".into())
            .spawn(move || {
                writer_loop(
                    sink,
                    receiver,
                    worker_counters,
                    worker_abandon,
                    worker_halt,
                )
            })
            .map_err(StoreError::Io)?;

        Ok(Self {
            sender,
            evictor,
            counters,
            stopping,
            abandon,
            halt,
            worker: Mutex::new(Some(join)),
        })
    }

    /// Queue a record. Never blocks. Returns `false` if the writer is
    /// shutting down and the record was discarded.
    pub fn submit(&self, record: LogRecord) -> bool {
        if self.stopping.load(Ordering::Acquire) {
            debug!(kind = ?record.kind(), "writer stopped; record discarded");
            return false;
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.enqueue(WriteCommand::Record(record))
    }

    fn enqueue(&self, mut command: WriteCommand) -> bool {
        loop {
            match self.sender.try_send(command) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    command = back;
                    self.evict_oldest();
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    fn evict_oldest(&self) {
        let Some(evictor) = self.evictor.as_ref() else {
            return;
        };
        match evictor.try_recv() {
            Ok(WriteCommand::Record(record)) => {
                let dropped = self.counters.dropped_overflow.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = ?record.kind(),
                    timestamp = record.timestamp().0,
                    dropped_total = dropped,
                    "write queue full; dropped oldest record"
                );
            }
            // Nothing is queued ahead of an oldest barrier, so it is satisfied.
            Ok(WriteCommand::Flush(ack)) => {
                let _ = ack.send(());
            }
            Err(_) => {}
        }
    }

    /// Wait until everything submitted so far has been handled, or until
    /// `timeout` passes. Returns `true` if the queue was drained.
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.worker.lock().is_none() {
            return true;
        }
        let (ack_tx, ack_rx) = bounded(1);
        if !self.enqueue(WriteCommand::Flush(ack_tx)) {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Drain for at most `timeout`, then stop the thread. Records still
    /// queued after the timeout are discarded. Idempotent.
    ///
    /// Returns within roughly `timeout` even if a sink call never returns:
    /// in that case the thread is detached and exits on its own once the
    /// call completes.
    pub fn shutdown(&self, timeout: Duration) {
        self.stopping.store(true, Ordering::Release);

        let drained = self.flush(timeout);
        if !drained {
            self.abandon.store(true, Ordering::Release);
            warn!(
                pending = self.sender.len(),
                timeout_ms = timeout.as_millis() as u64,
                "writer drain timed out; discarding queued records"
            );
        }
        self.halt.store(true, Ordering::Release);

        let Some(join) = self.worker.lock().take() else {
            return;
        };
        if !drained {
            warn!("writer still inside a sink call; detaching thread");
            drop(join);
            return;
        }
        if join.join().is_err() {
            error!("writer thread panicked");
        }
        info!("writer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn stats(&self) -> WriterStats {
        let c = &self.counters;
        WriterStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            written: c.written.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            not_open: c.not_open.load(Ordering::Relaxed),
            dropped_overflow: c.dropped_overflow.load(Ordering::Relaxed),
            dropped_shutdown: c.dropped_shutdown.load(Ordering::Relaxed),
            pending: self.sender.len(),
        }
    }
}

impl Drop for RecordWriter {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(500));
    }
}

fn writer_loop(
    sink: Arc<dyn RecordSink>,
    receiver: Receiver<WriteCommand>,
    counters: Arc<Counters>,
    abandon: Arc<AtomicBool>,
    halt: Arc<AtomicBool>,
) {
    loop {
        match receiver.recv_timeout(IDLE_POLL) {
            Ok(WriteCommand::Record(record)) => {
                if abandon.load(Ordering::Acquire) {
                    counters.dropped_shutdown.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                write_one(sink.as_ref(), &record, &counters);
            }
            Ok(WriteCommand::Flush(ack)) => {
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Timeout) => {
                if halt.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Anything left behind once halted is discarded.
    let leftover = receiver
        .try_iter()
        .filter(|c| matches!(c, WriteCommand::Record(_)))
        .count();
    if leftover > 0 {
        counters
            .dropped_shutdown
            .fetch_add(leftover as u64, Ordering::Relaxed);
    }
}

/// Write one record. Failures are logged and counted, never retried.
fn write_one(sink: &dyn RecordSink, record: &LogRecord, counters: &Counters) {
    let outcome = catch_unwind(AssertUnwindSafe(|| sink.write(record)));
    match outcome {
        Ok(Ok(())) => {
            counters.written.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(StoreError::NotOpen)) => {
            counters.not_open.fetch_add(1, Ordering::Relaxed);
            error!(
                kind = ?record.kind(),
                timestamp = record.timestamp().0,
                "record reached a closed log store"
            );
        }
        Ok(Err(e)) => {
            counters.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(kind = ?record.kind(), error = %e, "failed to persist record; skipped");
        }
        Err(_) => {
            counters.write_failures.fetch_add(1, Ordering::Relaxed);
            error!(kind = ?record.kind(), "record sink panicked; record skipped");
        }
    }
}
