//! Property tests for the ordering and replication guarantees.

use crate::builder;
use journal_rs::{ASQN_IGNORE, FlushStrategy, JournalError, SegmentedJournal};
use proptest::prelude::*;
use std::path::Path;

fn open(dir: &Path) -> SegmentedJournal {
    builder(dir)
        .with_max_segment_size(512)
        .with_flush_strategy(FlushStrategy::NoOp)
        .build()
        .expect("open journal")
}

/// Either the sentinel or a small positive asqn.
fn arb_asqn() -> impl Strategy<Value = i64> {
    prop_oneof![1 => Just(ASQN_IGNORE), 4 => 0i64..50]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn increasing_asqns_get_contiguous_indexes(
        steps in proptest::collection::vec(1i64..1_000, 1..60),
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let journal = open(dir.path());

        let mut asqn = 0;
        for (i, step) in steps.iter().enumerate() {
            asqn += step;
            let record = journal.append(asqn, vec![i as u8; 16]).expect("append");
            prop_assert_eq!(record.index(), i as u64 + 1);
            prop_assert_eq!(record.asqn(), asqn);
        }

        let read: Vec<i64> = journal
            .open_reader()
            .map(|record| record.expect("valid record").asqn())
            .collect();
        prop_assert_eq!(read.len(), steps.len());
        prop_assert_eq!(*read.last().expect("records"), asqn);
    }

    #[test]
    fn asqn_watermark_matches_model(asqns in proptest::collection::vec(arb_asqn(), 1..80)) {
        let dir = tempfile::tempdir().expect("tempdir");
        let journal = open(dir.path());

        let mut watermark = ASQN_IGNORE;
        let mut appended = 0u64;
        for asqn in asqns {
            let result = journal.append(asqn, &b"x"[..]);
            if asqn == ASQN_IGNORE || asqn > watermark {
                let record = result.expect("accepted");
                appended += 1;
                prop_assert_eq!(record.index(), appended);
                if asqn != ASQN_IGNORE {
                    watermark = asqn;
                }
            } else {
                let rejected = matches!(result, Err(JournalError::InvalidAsqn { .. }));
                prop_assert!(rejected, "asqn {} should be rejected", asqn);
            }
            prop_assert_eq!(journal.last_asqn(), watermark);
            prop_assert_eq!(journal.last_index(), appended);
        }
    }

    #[test]
    fn seek_to_asqn_matches_model(
        asqns in proptest::collection::vec(arb_asqn(), 1..80),
        query in -2i64..55,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let journal = open(dir.path());

        let accepted: Vec<_> = asqns
            .into_iter()
            .filter_map(|asqn| journal.append(asqn, vec![3u8; 8]).ok())
            .collect();
        let expected = accepted
            .iter()
            .filter(|record| record.asqn() != ASQN_IGNORE && record.asqn() <= query)
            .map(|record| record.index())
            .last()
            .unwrap_or(1);

        let mut reader = journal.open_reader();
        prop_assert_eq!(reader.seek_to_asqn(query).expect("seek by asqn"), expected);
    }

    #[test]
    fn wrong_index_is_always_rejected(existing in 1u64..20, offset in 0u64..40) {
        let dir = tempfile::tempdir().expect("tempdir");
        let leader = open(&dir.path().join("leader"));
        let follower = open(&dir.path().join("follower"));

        for i in 0..existing + 41 {
            leader.append(i as i64 + 1, vec![1u8; 4]).expect("append");
        }
        for record in leader.open_reader().take(existing as usize) {
            follower.append_record(&record.expect("valid record")).expect("replicate");
        }

        // anything but existing + 1 is a duplicate or a gap
        let target = if offset < existing { offset + 1 } else { existing + 2 + offset };
        let mut reader = leader.open_reader();
        reader.seek(target);
        let record = reader.next().expect("record").expect("valid record");
        let rejected = matches!(
            follower.append_record(&record),
            Err(JournalError::InvalidIndex { .. })
        );
        prop_assert!(rejected);
        prop_assert_eq!(follower.last_index(), existing);
    }

    #[test]
    fn replicated_bytes_are_identical(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..30),
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let leader = open(&dir.path().join("leader"));
        let follower = open(&dir.path().join("follower"));

        for (i, data) in payloads.iter().enumerate() {
            let asqn = if i % 3 == 0 { ASQN_IGNORE } else { i as i64 };
            let record = leader.append(asqn, data.clone()).expect("append");
            let copy = follower
                .append_serialized(record.checksum(), record.serialized_record().to_vec())
                .expect("replicate");
            prop_assert_eq!(&copy, &record);
        }

        let left: Vec<_> = leader.open_reader().map(|r| r.expect("valid")).collect();
        let right: Vec<_> = follower.open_reader().map(|r| r.expect("valid")).collect();
        prop_assert_eq!(left, right);
    }
}
