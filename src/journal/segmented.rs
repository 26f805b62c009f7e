//! The segmented journal.
//!
//! [`SegmentedJournal`] owns an ordered list of [`Segment`]s that partition
//! the journal's index range without gaps. Only the last segment (the tail)
//! is writable; when a record does not fit, the tail is sealed and a new
//! segment starting at the record's index is created.
//!
//! # Concurrency
//!
//! The handle is cheap to clone and can be shared across threads. Every
//! mutation takes an exclusive lock for the whole validate-then-write
//! sequence; readers take a shared lock per record, so they never observe a
//! partially written frame. The configured [`Flusher`] runs after the write
//! lock is released.
//!
//! # Recovery
//!
//! Opening a directory that already holds segments rescans every frame. A
//! damaged record at or below the metastore's last flushed index always
//! fails with [`JournalError::CorruptSegment`]; above it, the
//! [`RecoveryPolicy`] decides between failing and truncating the journal
//! back to the last verified record.

use super::config::{FlushStrategy, JournalConfig, RecoveryPolicy};
use super::error::JournalError;
use super::flusher::{DIRECT, Flusher, FlusherFactory, NOOP};
use super::metastore::{FileMetaStore, JournalMetaStore};
use super::reader::JournalReader;
use super::record::{ASQN_IGNORE, JournalRecord};
use super::segment::{
    DESCRIPTOR_SIZE, Segment, SegmentDescriptor, SegmentInfo, is_unwritten, list_segments,
    segment_path,
};
use bytes::Bytes;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

/// Mutable journal state guarded by the journal lock.
pub(crate) struct JournalState {
    segments: Vec<Segment>,
    next_segment_id: u64,
    last_asqn: i64,
    last_flushed_index: Option<u64>,
    /// Bumped whenever records or segments are removed.
    generation: u64,
    closed: bool,
}

impl JournalState {
    #[inline]
    pub(crate) fn first_index(&self) -> u64 {
        self.segments.first().map_or(1, Segment::first_index)
    }

    #[inline]
    pub(crate) fn last_index(&self) -> u64 {
        self.segments
            .last()
            .map_or(0, |segment| segment.last_index())
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.last_index() < self.first_index()
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub(crate) fn segment(&self, slot: usize) -> Option<&Segment> {
        self.segments.get(slot)
    }

    #[inline]
    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Slot of the segment whose range would contain `index`.
    pub(crate) fn segment_for(&self, index: u64) -> Option<usize> {
        self.segments
            .partition_point(|segment| segment.first_index() <= index)
            .checked_sub(1)
    }

    /// Segment slot and byte position of the record at `index`.
    pub(crate) fn locate(&self, index: u64) -> Result<Option<(usize, usize)>, JournalError> {
        let Some(slot) = self.segment_for(index) else {
            return Ok(None);
        };
        Ok(self.segments[slot]
            .seek_position(index)?
            .map(|position| (slot, position)))
    }

    fn ensure_open(&self) -> Result<(), JournalError> {
        if self.closed {
            Err(JournalError::Closed)
        } else {
            Ok(())
        }
    }

    fn tail_mut(&mut self) -> Result<&mut Segment, JournalError> {
        self.segments
            .last_mut()
            .ok_or_else(|| JournalError::InvalidConfig {
                message: "journal has no segments".to_string(),
            })
    }

    fn check_asqn(&self, asqn: i64) -> Result<(), JournalError> {
        if asqn != ASQN_IGNORE && asqn <= self.last_asqn {
            return Err(JournalError::InvalidAsqn {
                asqn,
                last_asqn: self.last_asqn,
            });
        }
        Ok(())
    }

    fn check_index(&self, index: u64) -> Result<(), JournalError> {
        let expected = self.last_index() + 1;
        if index != expected {
            return Err(JournalError::InvalidIndex {
                expected,
                actual: index,
            });
        }
        Ok(())
    }

    /// Write an already validated record, rolling over if needed.
    fn write(&mut self, config: &JournalConfig, record: &JournalRecord) -> Result<(), JournalError> {
        let frame_len = record.frame_len();
        let capacity = (config.max_segment_size as usize).saturating_sub(DESCRIPTOR_SIZE);
        if frame_len > capacity {
            return Err(JournalError::EntryTooLarge {
                entry_bytes: frame_len,
                segment_size: capacity,
            });
        }

        if !self.tail_mut()?.can_fit(frame_len) {
            self.roll_over(config, record.index())?;
        }
        self.tail_mut()?.append(record)?;

        if record.asqn() != ASQN_IGNORE {
            self.last_asqn = record.asqn();
        }
        Ok(())
    }

    fn roll_over(&mut self, config: &JournalConfig, first_index: u64) -> Result<(), JournalError> {
        let sealed = self.tail_mut()?;
        sealed.seal()?;
        let (sealed_id, sealed_last) = (sealed.id(), sealed.last_index());

        let segment = self.create_segment(config, first_index)?;
        info!(
            sealed = sealed_id,
            sealed_last_index = sealed_last,
            segment = segment.id(),
            first_index,
            "journal segment rolled over"
        );
        self.segments.push(segment);
        telemetry::segments(self.segments.len());
        Ok(())
    }

    fn create_segment(
        &mut self,
        config: &JournalConfig,
        first_index: u64,
    ) -> Result<Segment, JournalError> {
        let id = self.next_segment_id;
        let descriptor = SegmentDescriptor {
            id,
            first_index,
            max_segment_size: config.max_segment_size,
        };
        let segment = Segment::create(
            &segment_path(&config.directory, &config.name, id),
            descriptor,
            config.index_density,
        )?;
        self.next_segment_id += 1;
        Ok(segment)
    }

    fn flush(&mut self, meta_store: &dyn JournalMetaStore) -> Result<(), JournalError> {
        let mut flushed = false;
        for segment in &mut self.segments {
            flushed |= segment.flush()?;
        }

        let last_index = self.last_index();
        if !self.is_empty() && self.last_flushed_index != Some(last_index) {
            meta_store.store_last_flushed_index(last_index)?;
            self.last_flushed_index = Some(last_index);
        }

        if flushed {
            trace!(last_index, "journal flushed");
            telemetry::flushed();
        }
        Ok(())
    }

    /// Last non-sentinel asqn still stored in the journal.
    fn scan_last_asqn(&self) -> Result<i64, JournalError> {
        for segment in self.segments.iter().rev() {
            if let Some(asqn) = segment.last_asqn()? {
                return Ok(asqn);
            }
        }
        Ok(ASQN_IGNORE)
    }
}

struct JournalInner {
    config: JournalConfig,
    state: RwLock<JournalState>,
    flusher: Arc<dyn Flusher>,
    meta_store: Arc<dyn JournalMetaStore>,
}

impl Drop for JournalInner {
    fn drop(&mut self) {
        self.flusher.close();
        if let Ok(state) = self.state.get_mut()
            && !state.closed
        {
            for segment in &mut state.segments {
                if let Err(e) = segment.flush() {
                    warn!(error = %e, segment = segment.id(), "failed to flush segment on drop");
                }
            }
        }
    }
}

/// An append-only, segmented, checksummed journal.
///
/// Cloning yields another handle to the same journal.
///
/// # Example
///
/// ```no_run
/// use journal_rs::{ASQN_IGNORE, SegmentedJournal};
///
/// let journal = SegmentedJournal::builder()
///     .with_directory("/tmp/raft-journal")
///     .with_index_density(5)
///     .build()?;
///
/// let record = journal.append(10, &b"command"[..])?;
/// assert_eq!(record.index(), journal.last_index());
/// journal.append(ASQN_IGNORE, &b"heartbeat"[..])?;
///
/// let mut reader = journal.open_reader();
/// while let Some(record) = reader.next() {
///     println!("{} -> {:?}", record?.index(), journal.last_asqn());
/// }
/// # Ok::<(), journal_rs::JournalError>(())
/// ```
#[derive(Clone)]
pub struct SegmentedJournal {
    inner: Arc<JournalInner>,
}

impl std::fmt::Debug for SegmentedJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("SegmentedJournal");
        debug
            .field("directory", &self.inner.config.directory)
            .field("name", &self.inner.config.name);
        if let Ok(state) = self.inner.state.read() {
            debug
                .field("first_index", &state.first_index())
                .field("last_index", &state.last_index())
                .field("segments", &state.segments.len());
        }
        debug.field("flusher", &self.inner.flusher).finish()
    }
}

impl SegmentedJournal {
    /// Start configuring a journal.
    #[must_use]
    pub fn builder() -> SegmentedJournalBuilder {
        SegmentedJournalBuilder::new()
    }

    /// Open (or create) a journal with `config` and its flush strategy.
    ///
    /// # Errors
    ///
    /// See [`SegmentedJournalBuilder::build`].
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        SegmentedJournalBuilder::new().with_config(config).build()
    }

    #[inline]
    pub(crate) fn read_state(&self) -> Result<RwLockReadGuard<'_, JournalState>, JournalError> {
        self.inner.state.read().map_err(|_| JournalError::LockPoisoned)
    }

    #[inline]
    fn write_state(&self) -> Result<RwLockWriteGuard<'_, JournalState>, JournalError> {
        self.inner
            .state
            .write()
            .map_err(|_| JournalError::LockPoisoned)
    }

    /// Append a new record with the next index.
    ///
    /// # Errors
    ///
    /// - [`JournalError::InvalidAsqn`] if `asqn` is not [`ASQN_IGNORE`] and
    ///   not greater than [`last_asqn`](Self::last_asqn).
    /// - [`JournalError::EntryTooLarge`] if the record cannot fit a segment.
    /// - I/O and flush errors, which are fatal.
    pub fn append(&self, asqn: i64, data: impl Into<Bytes>) -> Result<JournalRecord, JournalError> {
        let record = {
            let mut state = self.write_state()?;
            state.ensure_open()?;
            state.check_asqn(asqn)?;
            let record = JournalRecord::new(state.last_index() + 1, asqn, data)?;
            state.write(&self.inner.config, &record)?;
            record
        };
        self.appended(&record)?;
        Ok(record)
    }

    /// Append a record produced elsewhere, e.g. by a leader.
    ///
    /// The record is checked in this order: checksum, index, asqn. Nothing is
    /// written unless all three pass.
    ///
    /// # Errors
    ///
    /// - [`JournalError::InvalidChecksum`] if the declared checksum does not
    ///   match the serialized record.
    /// - [`JournalError::InvalidIndex`] if the index is not
    ///   `last_index() + 1`.
    /// - [`JournalError::InvalidAsqn`] as for [`append`](Self::append).
    pub fn append_record(&self, record: &JournalRecord) -> Result<JournalRecord, JournalError> {
        let computed = record.computed_checksum();
        if computed != record.checksum() {
            return Err(JournalError::InvalidChecksum {
                index: record.index(),
                declared: record.checksum(),
                computed,
            });
        }

        {
            let mut state = self.write_state()?;
            state.ensure_open()?;
            state.check_index(record.index())?;
            state.check_asqn(record.asqn())?;
            state.write(&self.inner.config, record)?;
        }
        self.appended(record)?;
        Ok(record.clone())
    }

    /// Append a record given its exact serialized bytes and declared
    /// checksum, as received over the network.
    ///
    /// # Errors
    ///
    /// [`JournalError::InvalidEntryHeader`] if the bytes do not decode, then
    /// as for [`append_record`](Self::append_record).
    pub fn append_serialized(
        &self,
        checksum: u32,
        serialized: impl Into<Bytes>,
    ) -> Result<JournalRecord, JournalError> {
        let record = JournalRecord::from_serialized(checksum, serialized)?;
        self.append_record(&record)
    }

    fn appended(&self, record: &JournalRecord) -> Result<(), JournalError> {
        trace!(index = record.index(), asqn = record.asqn(), "journal record appended");
        telemetry::appended();
        self.inner.flusher.flush(self)
    }

    /// Open a reader positioned at the first record.
    #[must_use]
    pub fn open_reader(&self) -> JournalReader {
        JournalReader::new(self.clone())
    }

    /// Open a reader positioned at `index` (clamped to the journal's range).
    #[must_use]
    pub fn open_reader_at(&self, index: u64) -> JournalReader {
        let mut reader = JournalReader::new(self.clone());
        reader.seek(index);
        reader
    }

    /// Discard every record with an index of `from_index` or above.
    ///
    /// Later segments are deleted and the segment holding `from_index - 1`
    /// becomes the writable tail. The asqn watermark falls back to the last
    /// remaining non-sentinel asqn, or [`ASQN_IGNORE`] if there is none.
    ///
    /// # Errors
    ///
    /// I/O and metastore errors.
    pub fn truncate(&self, from_index: u64) -> Result<(), JournalError> {
        let mut state = self.write_state()?;
        state.ensure_open()?;

        let last_index = state.last_index();
        if from_index > last_index {
            return Ok(());
        }
        let keep = from_index.max(state.first_index()) - 1;

        if state.last_flushed_index.is_some_and(|flushed| flushed > keep) {
            self.inner.meta_store.store_last_flushed_index(keep)?;
            state.last_flushed_index = Some(keep);
        }

        while state.segments.len() > 1
            && state
                .segments
                .last()
                .is_some_and(|segment| segment.first_index() > keep)
        {
            if let Some(segment) = state.segments.pop() {
                debug!(segment = segment.id(), "deleting truncated segment");
                segment.delete()?;
            }
        }
        state.tail_mut()?.truncate_after(keep)?;

        state.last_asqn = state.scan_last_asqn()?;
        state.generation += 1;

        info!(
            from_index,
            previous_last_index = last_index,
            last_index = state.last_index(),
            last_asqn = state.last_asqn,
            "journal truncated"
        );
        telemetry::truncated();
        telemetry::segments(state.segments.len());
        Ok(())
    }

    /// Delete sealed segments whose records all lie below `index`.
    ///
    /// The tail segment is never removed. Returns the number of deleted
    /// segments.
    ///
    /// # Errors
    ///
    /// I/O errors while deleting segment files.
    pub fn compact(&self, index: u64) -> Result<usize, JournalError> {
        let mut state = self.write_state()?;
        state.ensure_open()?;

        let removable = state
            .segments
            .iter()
            .take(state.segments.len().saturating_sub(1))
            .take_while(|segment| segment.last_index() < index)
            .count();
        if removable == 0 {
            return Ok(0);
        }

        for segment in state.segments.drain(..removable) {
            segment.delete()?;
        }
        state.generation += 1;

        info!(
            index,
            removed = removable,
            first_index = state.first_index(),
            "journal compacted"
        );
        telemetry::segments(state.segments.len());
        Ok(removable)
    }

    /// Delete every segment and restart empty, so that the next appended
    /// record gets `next_index`.
    ///
    /// # Errors
    ///
    /// [`JournalError::InvalidIndex`] for `next_index == 0`, and I/O or
    /// metastore errors.
    pub fn reset(&self, next_index: u64) -> Result<(), JournalError> {
        if next_index == 0 {
            return Err(JournalError::InvalidIndex {
                expected: 1,
                actual: 0,
            });
        }

        let mut state = self.write_state()?;
        state.ensure_open()?;

        // the flushed index must never point past the segments left on disk
        self.inner.meta_store.reset_last_flushed_index()?;
        state.last_flushed_index = None;
        for segment in std::mem::take(&mut state.segments) {
            segment.delete()?;
        }

        let segment = state.create_segment(&self.inner.config, next_index)?;
        state.segments.push(segment);
        state.last_asqn = ASQN_IGNORE;
        state.generation += 1;

        info!(next_index, "journal reset");
        telemetry::segments(state.segments.len());
        Ok(())
    }

    /// Force every appended record to stable storage and record the last
    /// flushed index in the metastore.
    ///
    /// Idempotent; a no-op once the journal is closed.
    ///
    /// # Errors
    ///
    /// I/O and metastore errors, which are fatal.
    pub fn flush(&self) -> Result<(), JournalError> {
        let mut state = self.write_state()?;
        if state.closed {
            return Ok(());
        }
        state.flush(self.inner.meta_store.as_ref())
    }

    /// Close the flusher, flush, and reject further mutations with
    /// [`JournalError::Closed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Errors of the final flush.
    pub fn close(&self) -> Result<(), JournalError> {
        self.inner.flusher.close();

        let mut state = self.write_state()?;
        if state.closed {
            return Ok(());
        }
        state.flush(self.inner.meta_store.as_ref())?;
        state.closed = true;

        info!(
            directory = %self.inner.config.directory.display(),
            last_index = state.last_index(),
            "journal closed"
        );
        Ok(())
    }

    /// Returns `true` once [`close`](Self::close) succeeded.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.read_state().map(|state| state.closed).unwrap_or(true)
    }

    /// Whether an append returning means the record is durable.
    #[must_use]
    pub fn is_direct_flush(&self) -> bool {
        self.inner.flusher.is_direct()
    }

    /// Index of the first record (or of the next record when empty).
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.read_state().map_or(1, |state| state.first_index())
    }

    /// Index of the last record, `first_index() - 1` when empty.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.read_state().map_or(0, |state| state.last_index())
    }

    /// Returns `true` if the journal holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_state().map_or(true, |state| state.is_empty())
    }

    /// Last accepted non-sentinel asqn, or [`ASQN_IGNORE`].
    #[must_use]
    pub fn last_asqn(&self) -> i64 {
        self.read_state()
            .map_or(ASQN_IGNORE, |state| state.last_asqn)
    }

    /// Last index recorded as flushed in the metastore.
    #[must_use]
    pub fn last_flushed_index(&self) -> Option<u64> {
        self.read_state()
            .ok()
            .and_then(|state| state.last_flushed_index)
    }

    /// Snapshot of every segment, oldest first.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.read_state()
            .map(|state| state.segments.iter().map(Segment::info).collect())
            .unwrap_or_default()
    }

    /// The configuration the journal was opened with.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.inner.config
    }
}

/// Load, verify and repair the segments found in the journal directory.
fn recover_segments(
    config: &JournalConfig,
    last_flushed_index: Option<u64>,
) -> Result<Vec<Segment>, JournalError> {
    let ids = list_segments(&config.directory, &config.name)?;
    let mut segments: Vec<Segment> = Vec::with_capacity(ids.len());
    let mut truncated = false;

    for (position, &id) in ids.iter().enumerate() {
        let path = segment_path(&config.directory, &config.name, id);
        // a crash while creating the newest segment leaves it without a descriptor
        if position + 1 == ids.len() && is_unwritten(&path)? {
            warn!(segment = id, path = %path.display(), "deleting unwritten journal segment");
            fs::remove_file(&path).map_err(JournalError::io_at(&path))?;
            break;
        }
        let (segment, failure) = Segment::open(&path, id, config.index_density)?;

        if let Some(previous) = segments.last()
            && segment.first_index() != previous.last_index() + 1
        {
            return Err(JournalError::CorruptSegment {
                path,
                offset: 0,
                message: format!(
                    "segment starts at index {} but the previous one ends at {}",
                    segment.first_index(),
                    previous.last_index()
                ),
            });
        }

        let Some(failure) = failure else {
            segments.push(segment);
            continue;
        };

        let flushed = last_flushed_index.is_some_and(|flushed| failure.index <= flushed);
        if flushed || config.recovery == RecoveryPolicy::Fail {
            return Err(JournalError::CorruptSegment {
                path,
                offset: failure.offset,
                message: format!(
                    "record {} is damaged{}: {}",
                    failure.index,
                    if flushed { " but was flushed" } else { "" },
                    failure.cause
                ),
            });
        }

        warn!(
            segment = id,
            index = failure.index,
            offset = failure.offset,
            cause = %failure.cause,
            "discarding damaged journal tail"
        );
        segments.push(segment);

        for &later in &ids[position + 1..] {
            let later_path = segment_path(&config.directory, &config.name, later);
            warn!(segment = later, "deleting segment after damaged tail");
            fs::remove_file(&later_path).map_err(JournalError::io_at(&later_path))?;
        }
        truncated = true;
        break;
    }

    if let Some(tail) = segments.last_mut() {
        tail.repair_tail()?;
        if truncated {
            debug!(segment = tail.id(), last_index = tail.last_index(), "tail repaired");
        }
    }

    let last_index = segments.last().map_or(0, |segment| segment.last_index());
    if let Some(flushed) = last_flushed_index
        && flushed > last_index
    {
        return Err(JournalError::CorruptSegment {
            path: config.directory.clone(),
            offset: 0,
            message: format!(
                "last flushed index {flushed} is beyond the last recovered index {last_index}"
            ),
        });
    }

    Ok(segments)
}

/// Builder for [`SegmentedJournal`].
#[derive(Default)]
pub struct SegmentedJournalBuilder {
    config: JournalConfig,
    flusher: Option<Arc<dyn Flusher>>,
    flusher_factory: Option<Box<dyn FlusherFactory>>,
    flush_context: Option<Handle>,
    meta_store: Option<Arc<dyn JournalMetaStore>>,
}

impl SegmentedJournalBuilder {
    /// Builder with [`JournalConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: JournalConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory holding the segment files.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.config.directory = directory.into();
        self
    }

    /// File name prefix of the segments.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Pre-allocated size of each segment file.
    #[must_use]
    pub fn with_max_segment_size(mut self, bytes: u64) -> Self {
        self.config.max_segment_size = bytes;
        self
    }

    /// Records per sparse-index entry.
    #[must_use]
    pub fn with_index_density(mut self, density: u64) -> Self {
        self.config.index_density = density;
        self
    }

    /// Flush strategy applied after appends.
    #[must_use]
    pub fn with_flush_strategy(mut self, strategy: FlushStrategy) -> Self {
        self.config.flush = strategy;
        self
    }

    /// Handling of damaged, unflushed records at startup.
    #[must_use]
    pub fn with_recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.config.recovery = policy;
        self
    }

    /// Use this flusher instead of the configured strategy.
    #[must_use]
    pub fn with_flusher(mut self, flusher: Arc<dyn Flusher>) -> Self {
        self.flusher = Some(flusher);
        self
    }

    /// Build the flusher with `factory` on the flush context.
    #[must_use]
    pub fn with_flusher_factory(mut self, factory: impl FlusherFactory + 'static) -> Self {
        self.flusher_factory = Some(Box::new(factory));
        self
    }

    /// Runtime on which delayed flushes are scheduled. Defaults to the
    /// runtime `build` is called from, if any.
    #[must_use]
    pub fn with_flush_context(mut self, handle: Handle) -> Self {
        self.flush_context = Some(handle);
        self
    }

    /// Metastore to use instead of `{directory}/{name}.meta`.
    #[must_use]
    pub fn with_meta_store(mut self, meta_store: Arc<dyn JournalMetaStore>) -> Self {
        self.meta_store = Some(meta_store);
        self
    }

    fn resolve_flusher(&self) -> Result<Arc<dyn Flusher>, JournalError> {
        if let Some(flusher) = &self.flusher {
            return Ok(Arc::clone(flusher));
        }

        match (&self.flusher_factory, self.config.flush) {
            (None, FlushStrategy::Direct) => Ok(Arc::new(DIRECT)),
            (None, FlushStrategy::NoOp) => Ok(Arc::new(NOOP)),
            (factory, strategy) => {
                let handle = self
                    .flush_context
                    .clone()
                    .or_else(|| Handle::try_current().ok())
                    .ok_or_else(|| JournalError::InvalidConfig {
                        message: "flusher requires a tokio runtime handle".to_string(),
                    })?;
                Ok(match factory {
                    Some(factory) => factory.create_flusher(&handle),
                    None => strategy.create_flusher(&handle),
                })
            }
        }
    }

    /// Open the journal, recovering existing segments.
    ///
    /// # Errors
    ///
    /// - [`JournalError::InvalidConfig`] for invalid settings, or a delayed
    ///   strategy without a tokio runtime.
    /// - [`JournalError::CorruptSegment`] when recovery refuses the data on
    ///   disk.
    /// - I/O and metastore errors.
    pub fn build(self) -> Result<SegmentedJournal, JournalError> {
        self.config.validate()?;
        let flusher = self.resolve_flusher()?;
        let config = self.config;

        fs::create_dir_all(&config.directory).map_err(JournalError::io_at(&config.directory))?;

        let meta_store = self.meta_store.unwrap_or_else(|| {
            Arc::new(FileMetaStore::in_directory(&config.directory, &config.name))
        });
        let last_flushed_index = meta_store.load_last_flushed_index()?;
        let segments = recover_segments(&config, last_flushed_index)?;
        let next_segment_id = segments.last().map_or(1, |segment| segment.id() + 1);

        let mut state = JournalState {
            segments,
            next_segment_id,
            last_asqn: ASQN_IGNORE,
            last_flushed_index,
            generation: 0,
            closed: false,
        };
        if state.segments.is_empty() {
            let segment = state.create_segment(&config, 1)?;
            state.segments.push(segment);
        }
        state.last_asqn = state.scan_last_asqn()?;

        info!(
            directory = %config.directory.display(),
            segments = state.segments.len(),
            first_index = state.first_index(),
            last_index = state.last_index(),
            last_asqn = state.last_asqn,
            direct_flush = flusher.is_direct(),
            "journal opened"
        );
        telemetry::segments(state.segments.len());

        Ok(SegmentedJournal {
            inner: Arc::new(JournalInner {
                config,
                state: RwLock::new(state),
                flusher,
                meta_store,
            }),
        })
    }
}

#[cfg(feature = "metrics")]
mod telemetry {
    pub(super) fn appended() {
        metrics::counter!("journal_appended_records_total").increment(1);
    }

    pub(super) fn flushed() {
        metrics::counter!("journal_flushes_total").increment(1);
    }

    pub(super) fn truncated() {
        metrics::counter!("journal_truncations_total").increment(1);
    }

    pub(super) fn segments(count: usize) {
        metrics::gauge!("journal_segments").set(count as f64);
    }
}

#[cfg(not(feature = "metrics"))]
mod telemetry {
    #[inline]
    pub(super) fn appended() {}

    #[inline]
    pub(super) fn flushed() {}

    #[inline]
    pub(super) fn truncated() {}

    #[inline]
    pub(super) fn segments(_count: usize) {}
}
