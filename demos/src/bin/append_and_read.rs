//! Example showing the basic journal lifecycle
//!
//! This example shows how to:
//! 1. Open a journal with small segments so rollover is visible
//! 2. Append records with application sequence numbers
//! 3. Read them back sequentially and by seeking
//! 4. Reopen the journal and find everything still there

use demos::{preview, setup_logger};
use journal_rs::{ASQN_IGNORE, JournalError, SegmentedJournal};
use tracing::{info, warn};

fn open(dir: &std::path::Path) -> Result<SegmentedJournal, JournalError> {
    SegmentedJournal::builder()
        .with_directory(dir)
        .with_name("demo")
        .with_max_segment_size(4 * 1024)
        .with_index_density(16)
        .build()
}

fn main() -> Result<(), JournalError> {
    setup_logger();
    info!("=== Append and Read Demo ===\n");

    let dir = tempfile::tempdir()?;
    let journal = open(dir.path())?;

    info!("Step 1: Appending 200 records");
    for i in 1..=200i64 {
        // every tenth entry is a configuration change without a position
        let asqn = if i % 10 == 0 { ASQN_IGNORE } else { i * 100 };
        journal.append(asqn, format!("command #{i}").into_bytes())?;
    }
    info!(
        first = journal.first_index(),
        last = journal.last_index(),
        last_asqn = journal.last_asqn(),
        "journal state"
    );
    for segment in journal.segments() {
        info!(
            id = segment.id,
            first = segment.first_index,
            last = segment.last_index,
            bytes = segment.used_bytes,
            sealed = segment.sealed,
            "segment"
        );
    }

    info!("\nStep 2: Rejected appends leave the journal untouched");
    match journal.append(100, &b"stale"[..]) {
        Err(err) => warn!(%err, "append rejected"),
        Ok(record) => info!(index = record.index(), "unexpectedly accepted"),
    }

    info!("\nStep 3: Reading the first five records");
    for record in journal.open_reader().take(5) {
        let record = record?;
        info!(
            index = record.index(),
            asqn = record.asqn(),
            checksum = format_args!("{:08x}", record.checksum()),
            data = %preview(record.data()),
            "read"
        );
    }

    info!("\nStep 4: Seeking");
    let mut reader = journal.open_reader();
    let landed = reader.seek(150);
    if let Some(record) = reader.next() {
        let record = record?;
        info!(landed, index = record.index(), asqn = record.asqn(), "seek to 150");
    }
    let landed = reader.seek_to_asqn(4_250)?;
    info!(landed, "seek to asqn 4250 lands on the last entry at or below it");

    journal.close()?;

    info!("\nStep 5: Reopening");
    let reopened = open(dir.path())?;
    info!(
        last = reopened.last_index(),
        last_asqn = reopened.last_asqn(),
        flushed = ?reopened.last_flushed_index(),
        records = reopened.open_reader().count(),
        "reopened journal"
    );

    Ok(())
}
