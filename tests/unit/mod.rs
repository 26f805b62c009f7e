//! Integration tests for the segmented journal.

mod flusher_tests;
mod property_tests;
mod reader_tests;
mod recovery_tests;

use journal_rs::{FlushStrategy, InMemoryMetaStore, SegmentedJournal, SegmentedJournalBuilder};
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Builder for a journal in `dir` with index density 5 and an in-memory
/// metastore.
pub(crate) fn builder(dir: &Path) -> SegmentedJournalBuilder {
    SegmentedJournal::builder()
        .with_directory(dir)
        .with_index_density(5)
        .with_meta_store(Arc::new(InMemoryMetaStore::new()))
}

pub(crate) fn open_journal(dir: &Path) -> SegmentedJournal {
    builder(dir).build().expect("open journal")
}

/// Journal with small segments and no flushing, for rollover-heavy tests.
pub(crate) fn open_small_journal(dir: &Path) -> SegmentedJournal {
    builder(dir)
        .with_max_segment_size(256)
        .with_flush_strategy(FlushStrategy::NoOp)
        .build()
        .expect("open journal")
}

/// Fixed-size payload so every frame has the same length.
pub(crate) fn payload(i: u64) -> Vec<u8> {
    format!("{i:08}").into_bytes()
}

/// Append `count` records with asqn `10 * index`.
pub(crate) fn fill(journal: &SegmentedJournal, count: u64) {
    let start = journal.last_index() + 1;
    for index in start..start + count {
        journal
            .append(index as i64 * 10, payload(index))
            .expect("append");
    }
}
