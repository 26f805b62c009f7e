//! Error types for the journal subsystem.
//!
//! [`JournalError`] covers every failure mode of the segmented journal:
//! rejected appends (index, asqn and checksum validation), on-disk
//! corruption found while reading or recovering, I/O and flush failures,
//! and configuration problems.
//!
//! Validation errors are local rejections: the journal is left exactly as it
//! was before the call. I/O, flush and corruption errors are fatal for the
//! journal instance, since the durability guarantee can no longer be upheld.

use std::io;
use std::path::{Path, PathBuf};

/// Errors that can occur within the journal subsystem.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum JournalError {
    /// The index of a record being appended is not `last_index + 1`.
    #[error("invalid index: expected {expected}, got {actual}")]
    InvalidIndex {
        /// The index the journal expected next.
        expected: u64,
        /// The index carried by the rejected record.
        actual: u64,
    },

    /// A non-sentinel asqn is not strictly greater than the last accepted one.
    #[error("invalid asqn {asqn}: must be greater than the last asqn {last_asqn}")]
    InvalidAsqn {
        /// The rejected application sequence number.
        asqn: i64,
        /// The last non-sentinel asqn accepted by the journal.
        last_asqn: i64,
    },

    /// The declared checksum of an externally produced record does not match
    /// the checksum recomputed over its serialized form.
    #[error(
        "invalid checksum for record {index}: declared {declared:#010x}, computed {computed:#010x}"
    )]
    InvalidChecksum {
        /// The index carried by the rejected record.
        index: u64,
        /// The checksum supplied by the caller.
        declared: u32,
        /// The checksum computed from the record bytes.
        computed: u32,
    },

    /// A segment file failed validation while opening or recovering.
    #[error("corrupt segment {}: {message} (offset {offset})", .path.display())]
    CorruptSegment {
        /// The segment file involved.
        path: PathBuf,
        /// Byte offset within the segment where the problem was found.
        offset: usize,
        /// Description of the problem.
        message: String,
    },

    /// A stored record failed checksum verification on read.
    #[error(
        "corrupt journal record at index {index}: expected CRC {expected_crc:#010x}, got {actual_crc:#010x}"
    )]
    CorruptRecord {
        /// The index of the corrupt record (as stored, possibly garbage).
        index: u64,
        /// The stored CRC32 checksum.
        expected_crc: u32,
        /// The CRC32 checksum computed from the record bytes.
        actual_crc: u32,
    },

    /// A record frame is truncated or malformed.
    #[error("invalid journal frame at offset {offset}: {message}")]
    InvalidEntryHeader {
        /// Byte offset of the frame.
        offset: usize,
        /// Description of the header problem.
        message: String,
    },

    /// A single record does not fit into an empty segment.
    #[error(
        "journal entry too large: {entry_bytes} bytes exceeds segment capacity {segment_size} bytes"
    )]
    EntryTooLarge {
        /// The size of the framed record in bytes.
        entry_bytes: usize,
        /// The usable capacity of a segment in bytes.
        segment_size: usize,
    },

    /// A write was attempted on a sealed (read-only) segment.
    #[error("segment {id} is sealed")]
    SegmentSealed {
        /// The id of the sealed segment.
        id: u64,
    },

    /// An I/O error occurred while reading or writing journal files.
    #[error("journal I/O error{}: {message}", display_path(.path.as_deref()))]
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The file path involved, if known.
        path: Option<PathBuf>,
    },

    /// A flush requested earlier (e.g. by a delayed flusher) failed.
    #[error("journal flush failed: {message}")]
    FlushFailed {
        /// Description of the failed flush.
        message: String,
    },

    /// The metadata store could not be read or written.
    #[error("journal metastore error: {message}")]
    MetaStore {
        /// Description of the problem.
        message: String,
    },

    /// The journal configuration is not usable.
    #[error("invalid journal configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The journal was closed and no longer accepts operations.
    #[error("journal is closed")]
    Closed,

    /// An internal lock was poisoned (another thread panicked while holding
    /// it).
    #[error("journal internal lock poisoned")]
    LockPoisoned,
}

impl JournalError {
    /// Returns `true` for the append rejections (`InvalidIndex`,
    /// `InvalidAsqn`, `InvalidChecksum`), which leave the journal unchanged.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            JournalError::InvalidIndex { .. }
                | JournalError::InvalidAsqn { .. }
                | JournalError::InvalidChecksum { .. }
        )
    }

    /// Returns `true` if the error means the journal can no longer guarantee
    /// durability or integrity and must not be used further.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JournalError::Io { .. }
                | JournalError::FlushFailed { .. }
                | JournalError::CorruptSegment { .. }
                | JournalError::CorruptRecord { .. }
                | JournalError::InvalidEntryHeader { .. }
                | JournalError::LockPoisoned
        )
    }

    /// Build a closure mapping an [`io::Error`] to [`JournalError::Io`] for
    /// the given path.
    pub(crate) fn io_at(path: &Path) -> impl FnOnce(io::Error) -> JournalError + '_ {
        move |err| JournalError::Io {
            message: err.to_string(),
            path: Some(path.to_path_buf()),
        }
    }
}

fn display_path(path: Option<&Path>) -> String {
    path.map(|p| format!(" at {}", p.display()))
        .unwrap_or_default()
}

impl From<io::Error> for JournalError {
    #[cold]
    fn from(err: io::Error) -> Self {
        JournalError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}
