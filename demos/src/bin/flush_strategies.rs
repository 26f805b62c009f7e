//! Example comparing the flush strategies
//!
//! Appends the same workload with direct, no-op and delayed flushing
//! and reports how long it took and what was durable afterwards.

use demos::setup_logger;
use journal_rs::{FlushStrategy, JournalError, SegmentedJournal};
use std::time::{Duration, Instant};
use tracing::info;

const RECORDS: i64 = 2_000;

fn run(strategy: FlushStrategy) -> Result<(), JournalError> {
    let dir = tempfile::tempdir()?;
    let journal = SegmentedJournal::builder()
        .with_directory(dir.path())
        .with_flush_strategy(strategy)
        .build()?;

    let started = Instant::now();
    for i in 1..=RECORDS {
        journal.append(i, vec![0x5Au8; 256])?;
    }
    let elapsed = started.elapsed();

    info!(
        ?strategy,
        ?elapsed,
        flushed = ?journal.last_flushed_index(),
        "after appends"
    );
    journal.close()?;
    info!(flushed = ?journal.last_flushed_index(), "after close");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), JournalError> {
    setup_logger();
    info!("=== Flush Strategies Demo ===\n");

    let strategies = [
        FlushStrategy::Direct,
        FlushStrategy::NoOp,
        FlushStrategy::delayed(Duration::from_millis(5), 0),
        FlushStrategy::delayed(Duration::from_millis(50), 500),
    ];
    for strategy in strategies {
        // appends block on fsync, keep them off the async workers
        tokio::task::spawn_blocking(move || run(strategy))
            .await
            .map_err(|err| JournalError::FlushFailed {
                message: err.to_string(),
            })??;
    }
    Ok(())
}
