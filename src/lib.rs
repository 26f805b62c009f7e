//! # Segmented Journal
//!
//! An append-only, segment-based, checksummed record store for replicated
//! consensus logs, with pluggable flush strategies and crash-safe recovery.
//!
//! ## Key Features
//!
//! - **Strict ordering**: every record gets the next contiguous index;
//!   application sequence numbers (asqn) must strictly increase, except for
//!   the [`ASQN_IGNORE`] sentinel, which is exempt.
//!
//! - **Bit-exact replication**: a record's serialized form and its CRC32
//!   checksum are identical on every journal that stores it, so a follower
//!   can append the leader's bytes with [`SegmentedJournal::append_serialized`].
//!
//! - **Memory-mapped segments**: the tail segment is pre-allocated and mapped
//!   writable; full segments are sealed, shrunk and mapped read-only.
//!
//! - **Sparse indexing**: each segment samples every `index_density`-th record
//!   so seeks decode a bounded number of frames.
//!
//! - **Flush strategies**: [`DirectFlusher`] (sync per append),
//!   [`NoopFlusher`] (defer to the OS) and [`DelayedFlusher`] (batched on a
//!   tokio timer), or any custom [`Flusher`].
//!
//! - **Recovery**: torn or corrupt records that were never flushed are
//!   truncated or rejected according to [`RecoveryPolicy`]; damage to
//!   flushed data always stops startup.
//!
//! ## Example
//!
//! ```no_run
//! use journal_rs::prelude::*;
//!
//! let journal = SegmentedJournal::builder()
//!     .with_directory("/var/lib/raft/journal")
//!     .with_max_segment_size(64 * 1024 * 1024)
//!     .with_flush_strategy(FlushStrategy::NoOp)
//!     .build()?;
//!
//! let record = journal.append(1, &b"payload"[..])?;
//!
//! // Replicate the exact bytes to a follower.
//! let follower = SegmentedJournal::builder()
//!     .with_directory("/var/lib/raft/follower")
//!     .build()?;
//! follower.append_serialized(record.checksum(), record.serialized_record().clone())?;
//!
//! journal.flush()?;
//! # Ok::<(), JournalError>(())
//! ```
//!
//! ## On-Disk Format
//!
//! Segments are named `{name}-{id:020}.journal` and start with a 36-byte
//! descriptor followed by record frames. See [`journal::segment`] and
//! [`journal::record`] for the exact layouts.
//!
//! ## Feature Flags
//!
//! - `metrics`: emit `journal_appended_records_total`,
//!   `journal_flushes_total`, `journal_truncations_total` and the
//!   `journal_segments` gauge through the `metrics` crate.

pub mod journal;

pub mod prelude;

pub use journal::{
    ASQN_IGNORE, DelayedFlusher, DirectFlusher, FileMetaStore, FlushStrategy, Flusher,
    FlusherFactory, InMemoryMetaStore, JournalConfig, JournalError, JournalMetaStore,
    JournalReader, JournalRecord, NoopFlusher, RecoveryPolicy, SegmentInfo, SegmentedJournal,
    SegmentedJournalBuilder,
};
