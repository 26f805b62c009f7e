//! Prelude module that re-exports commonly used types and traits.
//!
//! ```rust
//! use journal_rs::prelude::*;
//! ```

// Journal and records
pub use crate::journal::record::{ASQN_IGNORE, JournalRecord};
pub use crate::journal::segmented::{SegmentedJournal, SegmentedJournalBuilder};

// Reading
pub use crate::journal::reader::JournalReader;

// Configuration
pub use crate::journal::config::{FlushStrategy, JournalConfig, RecoveryPolicy};

// Flushing and metadata
pub use crate::journal::flusher::{
    DIRECT, DelayedFlusher, DirectFlusher, Flusher, FlusherFactory, NOOP, NoopFlusher,
};
pub use crate::journal::metastore::{FileMetaStore, InMemoryMetaStore, JournalMetaStore};

// Errors
pub use crate::journal::error::JournalError;
