//! Segmented journal subsystem.
//!
//! # Types
//!
//! - [`SegmentedJournal`]: the journal, built with [`SegmentedJournalBuilder`]
//! - [`JournalRecord`]: an appended record and its serialized form
//! - [`JournalReader`]: forward cursor with sparse-index seeks
//! - [`Flusher`]: flush strategy interface, with [`DirectFlusher`],
//!   [`NoopFlusher`] and [`DelayedFlusher`]
//! - [`JournalMetaStore`]: persistence of the last flushed index
//! - [`JournalConfig`]: serde configuration surface
//! - [`JournalError`]: error type for every journal operation

pub mod checksum;
pub mod config;
pub mod error;
pub mod flusher;
pub mod metastore;
pub mod reader;
pub mod record;
pub mod segment;
pub mod segmented;
pub mod sparse_index;

pub use checksum::{compute_checksum, verify_checksum};
pub use config::{FlushStrategy, JournalConfig, RecoveryPolicy};
pub use error::JournalError;
pub use flusher::{
    DIRECT, DelayedFlusher, DirectFlusher, Flusher, FlusherFactory, NOOP, NoopFlusher,
    delayed_factory, direct_factory, noop_factory,
};
pub use metastore::{FileMetaStore, InMemoryMetaStore, JournalMetaStore};
pub use reader::JournalReader;
pub use record::{ASQN_IGNORE, FRAME_OVERHEAD, JournalRecord, serialize_record};
pub use segment::{DESCRIPTOR_SIZE, SegmentDescriptor, SegmentInfo};
pub use segmented::{SegmentedJournal, SegmentedJournalBuilder};
pub use sparse_index::{IndexInfo, SparseIndex};
