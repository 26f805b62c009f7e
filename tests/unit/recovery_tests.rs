//! Reopening journals and recovering from damaged segments.

use crate::{builder, fill, payload};
use journal_rs::journal::{DESCRIPTOR_SIZE, FRAME_OVERHEAD};
use journal_rs::{
    FileMetaStore, FlushStrategy, JournalError, JournalMetaStore, RecoveryPolicy, SegmentedJournal,
};
use std::fs;
use std::path::Path;

/// Every test record carries an 8-byte payload.
const FRAME_LEN: usize = FRAME_OVERHEAD + 8;

fn open_unflushed(dir: &Path, policy: RecoveryPolicy) -> Result<SegmentedJournal, JournalError> {
    SegmentedJournal::builder()
        .with_directory(dir)
        .with_index_density(5)
        .with_max_segment_size(256)
        .with_flush_strategy(FlushStrategy::NoOp)
        .with_recovery_policy(policy)
        .build()
}

fn open_flushed(dir: &Path) -> Result<SegmentedJournal, JournalError> {
    SegmentedJournal::builder()
        .with_directory(dir)
        .with_index_density(5)
        .with_max_segment_size(256)
        .build()
}

/// Flip the last payload byte of the `nth` record (0-based) of a segment.
fn corrupt_record(path: &Path, nth: usize) {
    let mut bytes = fs::read(path).expect("read segment");
    let offset = DESCRIPTOR_SIZE + nth * FRAME_LEN + FRAME_LEN - 1;
    bytes[offset] ^= 0xFF;
    fs::write(path, bytes).expect("write segment");
}

#[test]
fn reopen_restores_records_and_watermark() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let journal = open_flushed(dir.path()).expect("open");
        fill(&journal, 23);
        journal.close().expect("close");
    }

    let journal = open_flushed(dir.path()).expect("reopen");
    assert_eq!(journal.first_index(), 1);
    assert_eq!(journal.last_index(), 23);
    assert_eq!(journal.last_asqn(), 230);
    assert_eq!(journal.last_flushed_index(), Some(23));

    let mut reader = journal.open_reader();
    reader.seek(17);
    let record = reader.next().expect("record").expect("valid record");
    assert_eq!(record.asqn(), 170);
    assert_eq!(record.data().as_ref(), payload(17).as_slice());

    journal.append(240, payload(24)).expect("append after reopen");
    assert_eq!(journal.last_index(), 24);
}

#[test]
fn reopen_after_drop_without_close() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("open");
        fill(&journal, 7);
    }

    let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("reopen");
    assert_eq!(journal.last_index(), 7);
    assert_eq!(journal.segments().len(), 2);
}

#[test]
fn unflushed_corrupt_tail_is_truncated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tail = {
        let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("open");
        fill(&journal, 3);
        journal.segments()[0].path.clone()
    };
    corrupt_record(&tail, 2);

    let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("recover");

    assert_eq!(journal.last_index(), 2);
    assert_eq!(journal.last_asqn(), 20);
    let record = journal.append(30, payload(3)).expect("append");
    assert_eq!(record.index(), 3);
}

#[test]
fn unflushed_corrupt_tail_fails_with_fail_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tail = {
        let journal = open_unflushed(dir.path(), RecoveryPolicy::Fail).expect("open");
        fill(&journal, 3);
        journal.segments()[0].path.clone()
    };
    corrupt_record(&tail, 2);

    let err = open_unflushed(dir.path(), RecoveryPolicy::Fail).expect_err("must fail");
    assert!(matches!(err, JournalError::CorruptSegment { .. }));
    assert!(err.is_fatal());
}

#[test]
fn corrupt_flushed_record_always_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tail = {
        let journal = open_flushed(dir.path()).expect("open");
        fill(&journal, 3);
        journal.segments()[0].path.clone()
    };
    corrupt_record(&tail, 1);

    let err = open_flushed(dir.path()).expect_err("flushed data is damaged");
    match err {
        JournalError::CorruptSegment { offset, .. } => {
            assert_eq!(offset, DESCRIPTOR_SIZE + FRAME_LEN);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn damage_in_middle_segment_drops_later_segments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let segments = {
        let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("open");
        fill(&journal, 20);
        journal.segments()
    };
    assert_eq!(segments.len(), 4);
    assert_eq!(segments[1].first_index, 6);
    // record 7
    corrupt_record(&segments[1].path, 1);

    let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("recover");

    assert_eq!(journal.last_index(), 6);
    assert_eq!(journal.segments().len(), 2);
    assert!(!segments[2].path.exists());
    assert!(!segments[3].path.exists());

    fill(&journal, 10);
    assert_eq!(journal.open_reader().count(), 16);
}

#[test]
fn corrupt_descriptor_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = {
        let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("open");
        fill(&journal, 2);
        journal.segments()[0].path.clone()
    };
    let mut bytes = fs::read(&path).expect("read");
    bytes[10] ^= 0x01;
    fs::write(&path, bytes).expect("write");

    assert!(matches!(
        open_unflushed(dir.path(), RecoveryPolicy::Truncate),
        Err(JournalError::CorruptSegment { .. })
    ));
}

#[test]
fn missing_segment_is_a_gap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let segments = {
        let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("open");
        fill(&journal, 20);
        journal.segments()
    };
    fs::remove_file(&segments[1].path).expect("remove segment");

    assert!(matches!(
        open_unflushed(dir.path(), RecoveryPolicy::Truncate),
        Err(JournalError::CorruptSegment { .. })
    ));
}

#[test]
fn compacted_journal_reopens_at_new_first_index() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let journal = open_flushed(dir.path()).expect("open");
        fill(&journal, 20);
        journal.compact(11).expect("compact");
    }

    let journal = open_flushed(dir.path()).expect("reopen");
    assert_eq!(journal.first_index(), 11);
    assert_eq!(journal.last_index(), 20);
}

#[test]
fn custom_name_prefixes_segment_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let journal = builder(dir.path())
            .with_name("raft-partition-1")
            .build()
            .expect("open");
        fill(&journal, 2);
        let path = journal.segments()[0].path.clone();
        assert!(
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("raft-partition-1-"))
        );
    }

    // a journal with another name in the same directory starts empty
    let other = builder(dir.path()).build().expect("open");
    assert!(other.is_empty());
}

#[test]
fn unwritten_segment_from_interrupted_rollover_is_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let journal = open_flushed(dir.path()).expect("open");
        fill(&journal, 3);
        journal.close().expect("close");
    }
    // sized but never given a descriptor
    let unwritten = dir.path().join("journal-00000000000000000002.journal");
    fs::File::create(&unwritten)
        .and_then(|file| file.set_len(256))
        .expect("create segment file");

    let journal = open_flushed(dir.path()).expect("reopen");

    assert!(!unwritten.exists());
    assert_eq!(journal.segments().len(), 1);
    assert_eq!(journal.last_index(), 3);
    assert_eq!(journal.last_flushed_index(), Some(3));

    fill(&journal, 5);
    assert_eq!(journal.segments().len(), 2);
    assert_eq!(journal.open_reader().count(), 8);
}

#[test]
fn zeroed_descriptor_before_the_tail_still_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let segments = {
        let journal = open_unflushed(dir.path(), RecoveryPolicy::Truncate).expect("open");
        fill(&journal, 12);
        journal.segments()
    };
    assert_eq!(segments.len(), 3);
    let mut bytes = fs::read(&segments[1].path).expect("read");
    bytes[..DESCRIPTOR_SIZE].fill(0);
    fs::write(&segments[1].path, bytes).expect("write");

    assert!(matches!(
        open_unflushed(dir.path(), RecoveryPolicy::Truncate),
        Err(JournalError::CorruptSegment { .. })
    ));
}

#[test]
fn journal_reopens_after_reset_interrupted_before_new_segment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let segments = {
        let journal = open_flushed(dir.path()).expect("open");
        fill(&journal, 3);
        journal.close().expect("close");
        journal.segments()
    };

    // the state a reset leaves behind once the metastore is cleared and the
    // segments are gone, but before its first segment exists
    FileMetaStore::in_directory(dir.path(), "journal")
        .reset_last_flushed_index()
        .expect("reset metastore");
    for segment in &segments {
        fs::remove_file(&segment.path).expect("remove segment");
    }

    let journal = open_flushed(dir.path()).expect("reopen");
    assert!(journal.is_empty());
    assert_eq!(journal.last_flushed_index(), None);
    assert_eq!(journal.append(1, payload(1)).expect("append").index(), 1);
}
