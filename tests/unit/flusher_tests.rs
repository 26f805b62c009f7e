//! Flush strategies driven through the journal.

use crate::{builder, fill, payload};
use journal_rs::journal::delayed_factory;
use journal_rs::{
    DelayedFlusher, FlushStrategy, Flusher, JournalError, JournalMetaStore, SegmentedJournal,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;

#[derive(Debug, Default)]
struct CountingFlusher {
    calls: AtomicUsize,
}

impl Flusher for CountingFlusher {
    fn flush(&self, journal: &SegmentedJournal) -> Result<(), JournalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        journal.flush()
    }
}

#[derive(Debug)]
struct FailingMetaStore;

impl JournalMetaStore for FailingMetaStore {
    fn store_last_flushed_index(&self, _index: u64) -> Result<(), JournalError> {
        Err(JournalError::MetaStore {
            message: "disk full".to_string(),
        })
    }

    fn load_last_flushed_index(&self) -> Result<Option<u64>, JournalError> {
        Ok(None)
    }

    fn reset_last_flushed_index(&self) -> Result<(), JournalError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Direct / NoOp
// ---------------------------------------------------------------------------

#[test]
fn direct_flush_is_synchronous() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = builder(dir.path()).build().expect("open");

    assert!(journal.is_direct_flush());
    fill(&journal, 3);
    assert_eq!(journal.last_flushed_index(), Some(3));
}

#[test]
fn noop_flush_defers_until_explicit_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = builder(dir.path())
        .with_flush_strategy(FlushStrategy::NoOp)
        .build()
        .expect("open");

    assert!(!journal.is_direct_flush());
    fill(&journal, 3);
    assert_eq!(journal.last_flushed_index(), None);

    journal.flush().expect("flush");
    journal.flush().expect("flush is idempotent");
    assert_eq!(journal.last_flushed_index(), Some(3));
}

#[test]
fn custom_flusher_is_called_after_every_append() {
    let dir = tempfile::tempdir().expect("tempdir");
    let flusher = Arc::new(CountingFlusher::default());
    let journal = builder(dir.path())
        .with_flusher(flusher.clone())
        .build()
        .expect("open");

    fill(&journal, 4);
    assert!(journal.append(1, payload(5)).is_err());

    assert_eq!(flusher.calls.load(Ordering::SeqCst), 4);
}

#[test]
fn flush_failure_is_propagated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = SegmentedJournal::builder()
        .with_directory(dir.path())
        .with_meta_store(Arc::new(FailingMetaStore))
        .build()
        .expect("open");

    let err = journal.append(1, payload(1)).expect_err("flush fails");
    assert!(matches!(err, JournalError::MetaStore { .. }));
}

// ---------------------------------------------------------------------------
// Delayed
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delayed_flush_runs_after_delay() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = builder(dir.path())
        .with_flush_strategy(FlushStrategy::Delayed {
            delay_ms: 20,
            batch_size: 0,
        })
        .build()
        .expect("open");

    assert!(!journal.is_direct_flush());
    fill(&journal, 3);
    assert_eq!(journal.last_flushed_index(), None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(journal.last_flushed_index(), Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delayed_flush_batches_requests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let flusher = Arc::new(DelayedFlusher::new(
        Duration::from_secs(60),
        3,
        Handle::current(),
    ));
    let journal = builder(dir.path())
        .with_flusher(flusher.clone())
        .build()
        .expect("open");

    fill(&journal, 2);
    assert_eq!(flusher.pending_requests(), 2);
    assert!(flusher.is_scheduled());
    assert_eq!(journal.last_flushed_index(), None);

    fill(&journal, 1);
    assert_eq!(flusher.pending_requests(), 0);
    assert!(!flusher.is_scheduled());
    assert_eq!(journal.last_flushed_index(), Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delayed_flush_failure_surfaces_on_next_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = SegmentedJournal::builder()
        .with_directory(dir.path())
        .with_meta_store(Arc::new(FailingMetaStore))
        .with_flush_strategy(FlushStrategy::Delayed {
            delay_ms: 10,
            batch_size: 0,
        })
        .build()
        .expect("open");

    journal.append(1, payload(1)).expect("append");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = journal.append(2, payload(2)).expect_err("background failure");
    assert!(matches!(err, JournalError::FlushFailed { .. }));
    assert!(err.is_fatal());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_cancels_pending_delayed_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    let flusher = Arc::new(DelayedFlusher::new(
        Duration::from_secs(60),
        0,
        Handle::current(),
    ));
    let journal = builder(dir.path())
        .with_flusher(flusher.clone())
        .build()
        .expect("open");

    fill(&journal, 2);
    assert!(flusher.is_scheduled());

    journal.close().expect("close");
    assert!(!flusher.is_scheduled());
    assert_eq!(journal.last_flushed_index(), Some(2));
}

#[test]
fn delayed_flusher_uses_explicit_flush_context() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .expect("runtime");
    let dir = tempfile::tempdir().expect("tempdir");

    let journal = builder(dir.path())
        .with_flusher_factory(delayed_factory(Duration::from_millis(10), 0))
        .with_flush_context(runtime.handle().clone())
        .build()
        .expect("open");

    fill(&journal, 2);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(journal.last_flushed_index(), Some(2));
}
