//! Append-only record log.
//!
//! File layout: a 5-byte header (magic + schema version) followed by frames
//! of `kind (1) | len (4, LE) | MessagePack payload | crc32 (4, LE)`.

use crate::error::{Result, StoreError};
use crate::types::{EventRecord, LogRecord, RecordKind, Timestamp, ValueSample};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for the record log.
const LOG_MAGIC: &[u8; 4] = b"UAL\0";

/// Current schema version.
const LOG_VERSION: u8 = 1;

const HEADER_SIZE: u64 = 5;

/// Frame overhead: kind + length + checksum.
const FRAME_OVERHEAD: u64 = 1 + 4 + 4;

/// Outcome of reading one frame.
enum Frame {
    Record(LogRecord, u64),
    End,
    /// Short read, or a length running past the end of the file.
    Torn,
    /// Frame of `len` bytes that fails its kind, checksum or decode check.
    Corrupt { error: StoreError, len: u64 },
}

/// The newest `capacity` records by (timestamp, entry number).
struct RecentIndex {
    keys: BTreeMap<(Timestamp, u64), u64>,
    capacity: usize,
    /// Records seen so far, indexed or not.
    entries: u64,
    /// End of the last complete frame.
    end: u64,
}

impl RecentIndex {
    fn new(capacity: usize) -> Self {
        Self {
            keys: BTreeMap::new(),
            capacity: capacity.max(1),
            entries: 0,
            end: HEADER_SIZE,
        }
    }

    fn insert(&mut self, timestamp: Timestamp, offset: u64) {
        self.keys.insert((timestamp, self.entries), offset);
        self.entries += 1;
        if self.keys.len() > self.capacity {
            self.keys.pop_first();
        }
    }

    fn newest(&self, limit: usize) -> Vec<u64> {
        self.keys.values().rev().take(limit).copied().collect()
    }
}

/// Append-only log holding both the sample and event streams.
///
/// Only the newest [`INDEX_CAPACITY`](Self::INDEX_CAPACITY) records are kept
/// in memory. Larger `read_recent` limits fall back to a scan of the file.
pub struct RecordLog {
    path: PathBuf,
    file: File,
    index: RecentIndex,
    writes_since_sync: u64,
    /// Sync every N writes (0 is treated as 1).
    sync_interval: u64,
}

impl RecordLog {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Records held in the in-memory index.
    pub const INDEX_CAPACITY: usize = 10_000;

    /// Open or create a log for writing and take an exclusive lock on it.
    ///
    /// The parent directory must already exist. A torn or zero-filled tail
    /// left by a crash is truncated away.
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        Self::open_indexed(path.as_ref(), sync_interval, Self::INDEX_CAPACITY)
    }

    fn open_indexed(path: &Path, sync_interval: u64, capacity: usize) -> Result<Self> {
        let path = path.to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|_| StoreError::Locked)?;

        if file.metadata()?.len() == 0 {
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;
        }

        let mut log = Self::from_file(path, file, sync_interval, capacity)?;
        let actual = log.file.metadata()?.len();
        if actual > log.index.end {
            warn!(
                path = %log.path.display(),
                discarded = actual - log.index.end,
                "truncating torn tail of record log"
            );
            log.file.set_len(log.index.end)?;
            log.file.sync_all()?;
        }

        Ok(log)
    }

    /// Open an existing log read-only, without locking it.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path)?;
        Self::from_file(path, file, Self::DEFAULT_SYNC_INTERVAL, Self::INDEX_CAPACITY)
    }

    fn from_file(
        path: PathBuf,
        mut file: File,
        sync_interval: u64,
        capacity: usize,
    ) -> Result<Self> {
        Self::verify_header(&mut file)?;
        let mut index = RecentIndex::new(capacity);
        let len = file.metadata()?.len();
        Self::scan(&file, &mut index, len)?;

        Ok(Self {
            path,
            file,
            index,
            writes_since_sync: 0,
            sync_interval: sync_interval.max(1),
        })
    }

    /// Pick up frames another handle appended since the last scan. A file
    /// that shrank is indexed again from the start.
    pub fn refresh(&mut self) -> Result<()> {
        let len = self.file.metadata()?.len();
        if len < self.index.end {
            Self::verify_header(&mut self.file)?;
            self.index = RecentIndex::new(self.index.capacity);
        }
        Self::scan(&self.file, &mut self.index, len)
    }

    /// Append a record. Returns the offset of its frame.
    pub fn append(&mut self, record: &LogRecord) -> Result<u64> {
        let payload = match record {
            LogRecord::Sample(s) => rmp_serde::to_vec_named(s)?,
            LogRecord::Event(e) => rmp_serde::to_vec_named(e)?,
        };

        let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
        frame.push(record.kind().to_byte());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        let offset = self.index.end;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&frame)?;
        self.index.end += frame.len() as u64;
        self.index.insert(record.timestamp(), offset);

        self.writes_since_sync += 1;
        if self.writes_since_sync >= self.sync_interval {
            self.file.sync_all()?;
            self.writes_since_sync = 0;
        }

        Ok(offset)
    }

    /// Read the record whose frame starts at `offset`.
    pub fn read_at(&mut self, offset: u64) -> Result<LogRecord> {
        self.file.seek(SeekFrom::Start(offset))?;
        let remaining = self.index.end.saturating_sub(offset);
        match Self::read_frame(&mut self.file, remaining)? {
            Frame::Record(record, _) => Ok(record),
            Frame::Corrupt { error, .. } => Err(error),
            Frame::End | Frame::Torn => Err(StoreError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("no complete record at offset {}", offset),
            ))),
        }
    }

    /// Up to `limit` records, newest timestamp first. Ties are returned in
    /// reverse append order.
    pub fn read_recent(&mut self, limit: usize) -> Result<Vec<LogRecord>> {
        let offsets = if limit <= self.index.capacity {
            self.index.newest(limit)
        } else {
            let mut wide = RecentIndex::new(limit);
            Self::scan(&self.file, &mut wide, self.index.end)?;
            wide.newest(limit)
        };
        offsets.into_iter().map(|o| self.read_at(o)).collect()
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Number of records in the log.
    pub fn len(&self) -> usize {
        self.index.entries as usize
    }

    pub fn is_empty(&self) -> bool {
        self.index.entries == 0
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.index.end
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn verify_header(file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => StoreError::SchemaMismatch("missing log header".into()),
            _ => StoreError::Io(e),
        })?;

        if &header[..4] != LOG_MAGIC {
            return Err(StoreError::SchemaMismatch("not a record log".into()));
        }
        if header[4] != LOG_VERSION {
            return Err(StoreError::SchemaMismatch(format!(
                "unsupported schema version {} (expected {})",
                header[4], LOG_VERSION
            )));
        }
        Ok(())
    }

    /// Index frames from `index.end` up to `file_len`, stopping at the tail.
    ///
    /// A bad frame counts as tail when it reaches the end of the file or
    /// only zero bytes follow it. Anywhere else it is an error.
    fn scan(file: &File, index: &mut RecentIndex, file_len: u64) -> Result<()> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(index.end))?;
        let mut reader = BufReader::new(file);

        loop {
            let offset = index.end;
            match Self::read_frame(&mut reader, file_len.saturating_sub(offset))? {
                Frame::Record(record, len) => {
                    index.insert(record.timestamp(), offset);
                    index.end += len;
                }
                Frame::End | Frame::Torn => break,
                Frame::Corrupt { error, len } => {
                    let next = offset + len;
                    if next >= file_len || is_blank(reader.get_mut(), next, file_len)? {
                        break;
                    }
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    /// Read one frame of at most `remaining` bytes. Only I/O failures are
    /// errors; the length is checked before the payload is allocated.
    fn read_frame(reader: &mut impl Read, remaining: u64) -> Result<Frame> {
        let mut kind_byte = [0u8; 1];
        if remaining == 0 || reader.read(&mut kind_byte)? == 0 {
            return Ok(Frame::End);
        }
        let Some(kind) = RecordKind::from_byte(kind_byte[0]) else {
            return Ok(Frame::Corrupt {
                error: StoreError::SchemaMismatch(format!("unknown record kind {}", kind_byte[0])),
                len: remaining,
            });
        };

        let mut len_bytes = [0u8; 4];
        if !read_full(reader, &mut len_bytes)? {
            return Ok(Frame::Torn);
        }
        let len = u32::from_le_bytes(len_bytes) as u64;
        let frame_len = len + FRAME_OVERHEAD;
        if frame_len > remaining {
            return Ok(Frame::Torn);
        }

        let mut payload = vec![0u8; len as usize];
        if !read_full(reader, &mut payload)? {
            return Ok(Frame::Torn);
        }

        let mut crc_bytes = [0u8; 4];
        if !read_full(reader, &mut crc_bytes)? {
            return Ok(Frame::Torn);
        }
        let stored = u32::from_le_bytes(crc_bytes);
        let computed = crc32fast::hash(&payload);
        if stored != computed {
            return Ok(Frame::Corrupt {
                error: StoreError::ChecksumMismatch {
                    expected: stored,
                    got: computed,
                },
                len: frame_len,
            });
        }

        let decoded = match kind {
            RecordKind::Sample => {
                rmp_serde::from_slice::<ValueSample>(&payload).map(LogRecord::Sample)
            }
            RecordKind::Event => {
                rmp_serde::from_slice::<EventRecord>(&payload).map(LogRecord::Event)
            }
        };
        match decoded {
            Ok(record) => Ok(Frame::Record(record, frame_len)),
            Err(e) => Ok(Frame::Corrupt {
                error: e.into(),
                len: frame_len,
            }),
        }
    }
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Whether `file[from..to]` holds only zero bytes.
fn is_blank(file: &mut File, from: u64, to: u64) -> Result<bool> {
    file.seek(SeekFrom::Start(from))?;
    let mut rest = Read::by_ref(file).take(to.saturating_sub(from));
    let mut buf = [0u8; 4096];
    loop {
        let n = rest.read(&mut buf)?;
        if n == 0 {
            return Ok(true);
        }
        if buf[..n].iter().any(|&b| b != 0) {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(ts: i64, value: &str) -> LogRecord {
        LogRecord::Sample(ValueSample {
            timestamp: Timestamp(ts),
            node_id: "ns=2;i=42".to_string(),
            display_name: "Temperature".to_string(),
            value: value.to_string(),
            value_type: "Double".to_string(),
            source_tag: "opc.tcp://localhost:4840".to_string(),
        })
    }

    fn event(ts: i64) -> LogRecord {
        LogRecord::Event(EventRecord {
            timestamp: Timestamp(ts),
            event: r#"{"Severity":500}"#.to_string(),
            source_tag: "opc.tcp://localhost:4840".to_string(),
        })
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let mut log = RecordLog::open(dir.path().join("log.ual"), 1).unwrap();

        let offset = log.append(&sample(1, "21.5")).unwrap();
        assert_eq!(offset, HEADER_SIZE);
        assert_eq!(log.read_at(offset).unwrap(), sample(1, "21.5"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_recent_ordered_by_timestamp() {
        let dir = TempDir::new().unwrap();
        let mut log = RecordLog::open(dir.path().join("log.ual"), 100).unwrap();

        log.append(&sample(30, "c")).unwrap();
        log.append(&event(10)).unwrap();
        log.append(&sample(20, "b")).unwrap();

        let recent = log.read_recent(10).unwrap();
        let stamps: Vec<i64> = recent.iter().map(|r| r.timestamp().0).collect();
        assert_eq!(stamps, vec![30, 20, 10]);

        let top = log.read_recent(2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0], sample(30, "c"));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.ual");

        {
            let mut log = RecordLog::open(&path, 100).unwrap();
            for i in 1..=5 {
                log.append(&sample(i, &i.to_string())).unwrap();
            }
            log.append(&event(6)).unwrap();
            log.sync().unwrap();
        }

        let mut log = RecordLog::open(&path, 100).unwrap();
        assert_eq!(log.len(), 6);
        assert_eq!(log.read_recent(1).unwrap()[0], event(6));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.ual");

        let good_size = {
            let mut log = RecordLog::open(&path, 1).unwrap();
            log.append(&sample(1, "ok")).unwrap();
            log.size()
        };

        // Half-written frame
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0u8, 200, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let log = RecordLog::open(&path, 1).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.size(), good_size);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_size);
    }

    #[test]
    fn test_zero_filled_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.ual");

        let good_size = {
            let mut log = RecordLog::open(&path, 1).unwrap();
            log.append(&sample(1, "ok")).unwrap();
            log.size()
        };

        // Power loss can leave preallocated zeroes behind the last frame
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0u8; 16]).unwrap();
        }

        let mut log = RecordLog::open(&path, 1).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_size);

        log.append(&sample(2, "after")).unwrap();
        drop(log);
        let mut log = RecordLog::open(&path, 1).unwrap();
        assert_eq!(log.read_recent(1).unwrap()[0], sample(2, "after"));
    }

    #[test]
    fn test_oversized_length_is_torn() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.ual");

        let good_size = {
            let mut log = RecordLog::open(&path, 1).unwrap();
            log.append(&sample(1, "ok")).unwrap();
            log.size()
        };

        // Length claims ~4 GiB; must not be allocated
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0u8, 0xFF, 0xFF, 0xFF, 0xFF, 1, 2, 3]).unwrap();
        }

        assert_eq!(RecordLog::open_read_only(&path).unwrap().len(), 1);
        let log = RecordLog::open(&path, 1).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.size(), good_size);
    }

    #[test]
    fn test_corrupt_middle_frame_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.ual");

        {
            let mut log = RecordLog::open(&path, 1).unwrap();
            log.append(&sample(1, "first")).unwrap();
            log.append(&sample(2, "second")).unwrap();
        }

        // Flip a payload byte of the first frame
        let mut bytes = std::fs::read(&path).unwrap();
        let at = (HEADER_SIZE + 5 + 2) as usize;
        bytes[at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let result = RecordLog::open(&path, 1);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_recent_beyond_index_capacity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.ual");
        let mut log = RecordLog::open_indexed(&path, 100, 3).unwrap();

        for ts in [5, 1, 9, 3, 7, 2, 8, 4, 6, 0] {
            log.append(&sample(ts, &ts.to_string())).unwrap();
        }
        assert_eq!(log.len(), 10);

        let stamps = |records: Vec<LogRecord>| -> Vec<i64> {
            records.iter().map(|r| r.timestamp().0).collect()
        };
        assert_eq!(stamps(log.read_recent(2).unwrap()), vec![9, 8]);
        assert_eq!(stamps(log.read_recent(5).unwrap()), vec![9, 8, 7, 6, 5]);
    }

    #[test]
    fn test_read_only_refresh_follows_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.ual");

        let mut writer = RecordLog::open(&path, 1).unwrap();
        writer.append(&sample(1, "a")).unwrap();

        let mut reader = RecordLog::open_read_only(&path).unwrap();
        assert_eq!(reader.len(), 1);

        writer.append(&sample(2, "b")).unwrap();
        reader.refresh().unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.read_recent(1).unwrap()[0], sample(2, "b"));
    }

    #[test]
    fn test_foreign_file_is_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.db");
        std::fs::write(&path, b"SQLite format 3\0").unwrap();

        let result = RecordLog::open(&path, 1);
        assert!(matches!(result, Err(StoreError::SchemaMismatch(_))));
    }

    #[test]
    fn test_second_writer_is_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.ual");

        let _first = RecordLog::open(&path, 1).unwrap();
        let second = RecordLog::open(&path, 1);
        assert!(matches!(second, Err(StoreError::Locked)));

        // Readers do not take the lock
        assert!(RecordLog::open_read_only(&path).is_ok());
    }
}
