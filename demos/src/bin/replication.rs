//! Example of shipping records from a leader journal to a follower
//!
//! The follower stores the leader's serialized bytes unchanged, detects
//! a diverging suffix, truncates it and catches up.

use demos::setup_logger;
use journal_rs::{ASQN_IGNORE, FlushStrategy, JournalError, SegmentedJournal};
use std::path::Path;
use tracing::info;

fn open(dir: &Path) -> Result<SegmentedJournal, JournalError> {
    SegmentedJournal::builder()
        .with_directory(dir)
        .with_max_segment_size(2 * 1024)
        .with_flush_strategy(FlushStrategy::NoOp)
        .build()
}

fn ship(leader: &SegmentedJournal, follower: &SegmentedJournal) -> Result<usize, JournalError> {
    let mut shipped = 0;
    for record in leader.open_reader_at(follower.last_index() + 1) {
        let record = record?;
        follower.append_serialized(record.checksum(), record.serialized_record().clone())?;
        shipped += 1;
    }
    Ok(shipped)
}

/// First index where the follower disagrees with the leader.
fn find_conflict(
    leader: &SegmentedJournal,
    follower: &SegmentedJournal,
) -> Result<Option<u64>, JournalError> {
    let mut theirs = follower.open_reader();
    for record in leader.open_reader() {
        let record = record?;
        match theirs.next().transpose()? {
            Some(other) if other.checksum() == record.checksum() => {}
            Some(_) => return Ok(Some(record.index())),
            None => return Ok(None),
        }
    }
    Ok(theirs.has_next().then(|| leader.last_index() + 1))
}

fn main() -> Result<(), JournalError> {
    setup_logger();
    info!("=== Replication Demo ===\n");

    let dir = tempfile::tempdir()?;
    let leader = open(&dir.path().join("leader"))?;
    let follower = open(&dir.path().join("follower"))?;

    for i in 1..=40i64 {
        leader.append(i, format!("op-{i}").into_bytes())?;
    }
    let shipped = ship(&leader, &follower)?;
    info!(shipped, follower_last = follower.last_index(), "initial catch-up");

    info!("\nThe follower accepts entries from a stale leader");
    for i in 41..=45i64 {
        follower.append(ASQN_IGNORE, format!("stale-{i}").into_bytes())?;
    }
    for i in 41..=60i64 {
        leader.append(i, format!("op-{i}").into_bytes())?;
    }

    if let Some(conflict) = find_conflict(&leader, &follower)? {
        info!(conflict, "logs diverge, truncating follower");
        follower.truncate(conflict)?;
    }
    let shipped = ship(&leader, &follower)?;
    info!(
        shipped,
        leader_last = leader.last_index(),
        follower_last = follower.last_index(),
        follower_asqn = follower.last_asqn(),
        "caught up"
    );

    info!("\nThe leader compacts and a new follower installs a snapshot");
    let removed = leader.compact(45)?;
    let fresh = open(&dir.path().join("fresh"))?;
    fresh.reset(leader.first_index())?;
    let shipped = ship(&leader, &fresh)?;
    info!(
        removed,
        first = fresh.first_index(),
        last = fresh.last_index(),
        shipped,
        "snapshot installed"
    );

    leader.close()?;
    follower.close()?;
    fresh.close()?;
    Ok(())
}
