//! Forward cursor over a journal.
//!
//! A [`JournalReader`] returns records in increasing index order starting at
//! its position. Records appended after the reader was created become visible
//! as it advances. Seeking goes through the segment's sparse index, so it
//! decodes at most `index_density - 1` frame headers before the target.
//!
//! The reader remembers the byte position of the next frame between calls.
//! When the journal is truncated, compacted or reset, that position is
//! dropped and recomputed: a reader below the new first index moves up to
//! it, and a reader past the new tail moves back to `last_index + 1`.

use super::error::JournalError;
use super::record::{ASQN_IGNORE, JournalRecord};
use super::segment::DESCRIPTOR_SIZE;
use super::segmented::SegmentedJournal;

#[derive(Debug, Clone, Copy)]
struct Cursor {
    slot: usize,
    position: usize,
}

/// An independent cursor over a [`SegmentedJournal`].
#[derive(Debug)]
pub struct JournalReader {
    journal: SegmentedJournal,
    next_index: u64,
    cursor: Option<Cursor>,
    generation: u64,
}

impl JournalReader {
    pub(crate) fn new(journal: SegmentedJournal) -> Self {
        let (next_index, generation) = journal
            .read_state()
            .map(|state| (state.first_index(), state.generation()))
            .unwrap_or((1, 0));
        Self {
            journal,
            next_index,
            cursor: None,
            generation,
        }
    }

    /// Index of the record the next call to `next` returns.
    #[inline]
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Returns `true` if a record exists at the reader's position.
    #[must_use]
    pub fn has_next(&self) -> bool {
        let Ok(state) = self.journal.read_state() else {
            return false;
        };
        let mut index = self.next_index;
        if self.generation != state.generation() {
            index = index.min(state.last_index() + 1);
        }
        index.max(state.first_index()) <= state.last_index()
    }

    /// Position the reader at `index`, clamped to
    /// `[first_index, last_index + 1]`. Returns the new position.
    pub fn seek(&mut self, index: u64) -> u64 {
        if let Ok(state) = self.journal.read_state() {
            self.next_index = index.clamp(state.first_index(), state.last_index() + 1);
            self.generation = state.generation();
        }
        self.cursor = None;
        self.next_index
    }

    /// Position the reader at the first record.
    pub fn seek_to_first(&mut self) -> u64 {
        self.seek(0)
    }

    /// Position the reader at the last record (or the first index when the
    /// journal is empty).
    pub fn seek_to_last(&mut self) -> u64 {
        let last = self.journal.last_index();
        self.seek(last)
    }

    /// Position the reader on the last record whose asqn is not the sentinel
    /// and is at most `asqn`. Falls back to the first record if there is none.
    ///
    /// The sparse index picks the starting frame; the remaining scan holds
    /// the journal lock for one segment at a time.
    ///
    /// # Errors
    ///
    /// Returns read errors of the records scanned on the way.
    pub fn seek_to_asqn(&mut self, asqn: i64) -> Result<u64, JournalError> {
        let target = 'search: loop {
            let (mut slot, mut position, mut target, generation) = {
                let state = self.journal.read_state()?;
                let start = (0..state.segment_count()).rev().find_map(|slot| {
                    state
                        .segment(slot)
                        .and_then(|segment| segment.sparse_index().lookup_asqn(asqn))
                        .map(|info| (slot, info))
                });
                match start {
                    Some((slot, info)) => (slot, info.position, info.index, state.generation()),
                    None => (0, DESCRIPTOR_SIZE, state.first_index(), state.generation()),
                }
            };

            loop {
                let state = self.journal.read_state()?;
                if state.generation() != generation {
                    continue 'search;
                }
                let Some(segment) = state.segment(slot) else {
                    break 'search target;
                };
                while let Some((record, next)) = segment.read_at(position)? {
                    if record.asqn() != ASQN_IGNORE {
                        if record.asqn() > asqn {
                            break 'search target;
                        }
                        target = record.index();
                    }
                    position = next;
                }
                slot += 1;
                position = DESCRIPTOR_SIZE;
            }
        };
        Ok(self.seek(target))
    }

    fn read_next(&mut self) -> Result<Option<JournalRecord>, JournalError> {
        let Self {
            journal,
            next_index,
            cursor,
            generation,
        } = self;
        let state = journal.read_state()?;

        if *generation != state.generation() {
            *generation = state.generation();
            *cursor = None;
            *next_index = (*next_index).min(state.last_index() + 1);
        }
        if *next_index < state.first_index() {
            *next_index = state.first_index();
            *cursor = None;
        }
        if *next_index > state.last_index() {
            return Ok(None);
        }

        let missing = |offset: usize, index: u64| JournalError::InvalidEntryHeader {
            offset,
            message: format!("record {index} not found"),
        };

        let (mut slot, mut position) = match *cursor {
            Some(Cursor { slot, position }) => (slot, position),
            None => state
                .locate(*next_index)?
                .ok_or_else(|| missing(0, *next_index))?,
        };
        if state
            .segment(slot)
            .is_some_and(|segment| *next_index > segment.last_index())
        {
            slot += 1;
            position = DESCRIPTOR_SIZE;
        }

        let segment = state
            .segment(slot)
            .ok_or_else(|| missing(position, *next_index))?;

        match segment.read_at(position)? {
            Some((record, next)) if record.index() == *next_index => {
                *cursor = Some(Cursor {
                    slot,
                    position: next,
                });
                *next_index += 1;
                Ok(Some(record))
            }
            Some((record, _)) => Err(JournalError::InvalidEntryHeader {
                offset: position,
                message: format!(
                    "expected record {} but found {}",
                    *next_index,
                    record.index()
                ),
            }),
            None => Err(missing(position, *next_index)),
        }
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalRecord, JournalError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
