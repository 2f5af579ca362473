//! Record log implementation.
//!
//! Value samples and events share one append-only, checksummed log file
//! with an in-memory timestamp index for newest-first reads.

mod log;

pub use log::RecordLog;
