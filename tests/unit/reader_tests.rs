//! Reader iteration and seeking.

use crate::{fill, open_journal, open_small_journal};
use journal_rs::ASQN_IGNORE;
use std::thread;

#[test]
fn seek_uses_sparse_index() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = open_journal(dir.path());
    fill(&journal, 12);
    assert_eq!(journal.last_index(), 12);

    let mut reader = journal.open_reader();
    assert_eq!(reader.seek(7), 7);
    let record = reader.next().expect("record").expect("valid record");

    assert_eq!(record.index(), 7);
    assert_eq!(record.asqn(), 70);
    assert_eq!(reader.next_index(), 8);
}

#[test]
fn seek_is_clamped_to_journal_range() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = open_journal(dir.path());
    fill(&journal, 3);

    let mut reader = journal.open_reader();
    assert_eq!(reader.seek(0), 1);
    assert_eq!(reader.seek(99), 4);
    assert!(!reader.has_next());
    assert_eq!(reader.seek_to_last(), 3);
    assert!(reader.has_next());
    assert_eq!(reader.seek_to_first(), 1);
}

#[test]
fn seek_does_not_invalidate_returned_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = open_small_journal(dir.path());
    fill(&journal, 20);

    let mut reader = journal.open_reader();
    let first = reader.next().expect("record").expect("valid record");
    reader.seek(15);
    let fifteenth = reader.next().expect("record").expect("valid record");
    reader.seek(2);
    let second = reader.next().expect("record").expect("valid record");

    assert_eq!(first.index(), 1);
    assert_eq!(first.asqn(), 10);
    assert_eq!(fifteenth.index(), 15);
    assert_eq!(second.index(), 2);
}

#[test]
fn open_reader_at_index() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = open_small_journal(dir.path());
    fill(&journal, 20);

    let remaining: Vec<u64> = journal
        .open_reader_at(17)
        .map(|record| record.expect("valid record").index())
        .collect();
    assert_eq!(remaining, vec![17, 18, 19, 20]);
}

#[test]
fn seek_to_asqn_skips_ignored_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = open_journal(dir.path());
    journal.append(ASQN_IGNORE, &b"a"[..]).expect("append");
    journal.append(5, &b"b"[..]).expect("append");
    journal.append(ASQN_IGNORE, &b"c"[..]).expect("append");
    journal.append(9, &b"d"[..]).expect("append");

    let mut reader = journal.open_reader();
    assert_eq!(reader.seek_to_asqn(4).expect("seek"), 1);
    assert_eq!(reader.seek_to_asqn(5).expect("seek"), 2);
    assert_eq!(reader.seek_to_asqn(8).expect("seek"), 2);
    assert_eq!(reader.seek_to_asqn(9).expect("seek"), 4);
}

#[test]
fn readers_are_independent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = open_journal(dir.path());
    fill(&journal, 5);

    let mut a = journal.open_reader();
    let mut b = journal.open_reader();
    a.seek(4);

    assert_eq!(a.next().expect("record").expect("valid").index(), 4);
    assert_eq!(b.next().expect("record").expect("valid").index(), 1);
}

#[test]
fn concurrent_reader_sees_complete_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = open_small_journal(dir.path());

    let writer = {
        let journal = journal.clone();
        thread::spawn(move || fill(&journal, 200))
    };

    let mut reader = journal.open_reader();
    let mut expected = 1;
    while expected <= 200 {
        match reader.next() {
            Some(record) => {
                let record = record.expect("reader never sees a torn record");
                assert_eq!(record.index(), expected);
                assert!(record.has_valid_checksum());
                expected += 1;
            }
            None => thread::yield_now(),
        }
    }

    writer.join().expect("writer thread");
    assert!(!reader.has_next());
}

#[test]
fn seek_to_asqn_runs_alongside_writer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = open_small_journal(dir.path());
    fill(&journal, 20);

    let writer = {
        let journal = journal.clone();
        thread::spawn(move || fill(&journal, 300))
    };

    let mut reader = journal.open_reader();
    let mut previous = 0;
    while !writer.is_finished() {
        let landed = reader.seek_to_asqn(1_500).expect("seek by asqn");
        assert!(landed >= previous && landed <= 150);
        previous = landed;
    }
    writer.join().expect("writer thread");

    assert_eq!(journal.last_index(), 320);
    assert_eq!(reader.seek_to_asqn(1_500).expect("seek by asqn"), 150);
    assert_eq!(reader.seek_to_asqn(1_505).expect("seek by asqn"), 150);
}
