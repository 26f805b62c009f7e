//! Sparse index from journal index to byte position within a segment.
//!
//! Only every `density`-th index is recorded (indices divisible by the
//! density), which bounds both memory use and the forward scan needed to
//! reach an arbitrary index: a lookup returns the closest recorded entry at
//! or below the target, and at most `density - 1` records are decoded after
//! it.
//!
//! Entries also carry the record's asqn. Non-sentinel asqns grow with the
//! index, so a second map keyed by asqn answers "last entry at or below
//! this asqn" without decoding any record.

use super::record::ASQN_IGNORE;
use std::collections::BTreeMap;

/// A recorded `(index, asqn, position)` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexInfo {
    /// The journal index of the record.
    pub index: u64,
    /// The record's asqn, possibly [`ASQN_IGNORE`].
    pub asqn: i64,
    /// Byte offset of the record's frame within its segment.
    pub position: usize,
}

/// Sampled index-to-position map for a single segment.
#[derive(Debug, Clone)]
pub struct SparseIndex {
    density: u64,
    entries: BTreeMap<u64, IndexInfo>,
    /// Non-sentinel asqn to index, for the entries above.
    asqns: BTreeMap<i64, u64>,
}

impl SparseIndex {
    /// Create an empty index recording every `density`-th record.
    ///
    /// A density of zero is treated as one.
    #[must_use]
    pub fn new(density: u64) -> Self {
        Self {
            density: density.max(1),
            entries: BTreeMap::new(),
            asqns: BTreeMap::new(),
        }
    }

    /// Records `position` for `index` if the index falls on the density grid.
    #[inline]
    pub fn index(&mut self, index: u64, asqn: i64, position: usize) {
        if index % self.density == 0 {
            self.entries.insert(
                index,
                IndexInfo {
                    index,
                    asqn,
                    position,
                },
            );
            if asqn != ASQN_IGNORE {
                self.asqns.insert(asqn, index);
            }
        }
    }

    /// Closest recorded entry at or below `index`.
    #[must_use]
    pub fn lookup(&self, index: u64) -> Option<IndexInfo> {
        self.entries
            .range(..=index)
            .next_back()
            .map(|(_, info)| *info)
    }

    /// Last recorded entry whose asqn is not the sentinel and is at most
    /// `asqn`.
    #[must_use]
    pub fn lookup_asqn(&self, asqn: i64) -> Option<IndexInfo> {
        self.asqns
            .range(..=asqn)
            .next_back()
            .and_then(|(_, index)| self.entries.get(index).copied())
    }

    /// Drop every entry above `index`.
    pub fn delete_after(&mut self, index: u64) {
        if let Some(first_removed) = index.checked_add(1) {
            let _ = self.entries.split_off(&first_removed);
            self.asqns.retain(|_, kept| *kept <= index);
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.asqns.clear();
    }

    /// Records per entry.
    #[inline]
    #[must_use]
    pub fn density(&self) -> u64 {
        self.density
    }

    /// Number of recorded entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been recorded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
