//! Memory-mapped journal segments.
//!
//! A [`Segment`] is one file holding a contiguous range of records. The tail
//! segment is pre-allocated to the configured maximum size and mapped
//! writable; sealed segments are shrunk to their used size and mapped
//! read-only.
//!
//! # On-Disk Layout
//!
//! ```text
//! [36 bytes: descriptor][frame][frame]...[zero-filled free space]
//! ```
//!
//! Descriptor (little-endian):
//!
//! ```text
//! [4 bytes: magic "SJNL"][1 byte: version][3 bytes: reserved]
//! [8 bytes: segment id][8 bytes: first_index][8 bytes: max_segment_size]
//! [4 bytes: CRC32 of the preceding 32 bytes]
//! ```
//!
//! Segment files are named `{name}-{id:020}.journal`.

use super::checksum::compute_checksum;
use super::error::JournalError;
use super::record::{Frame, JournalRecord, read_frame, read_u32, read_u64};
use super::sparse_index::SparseIndex;
use memmap2::{Mmap, MmapMut};
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Size of the segment descriptor in bytes.
pub const DESCRIPTOR_SIZE: usize = 36;

const DESCRIPTOR_MAGIC: [u8; 4] = *b"SJNL";
const DESCRIPTOR_VERSION: u8 = 1;
const SEGMENT_EXTENSION: &str = "journal";

/// Identity of a segment, persisted at the start of its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Monotonic segment id, also encoded in the file name.
    pub id: u64,
    /// Index of the first record stored in the segment.
    pub first_index: u64,
    /// Pre-allocated size of the segment file in bytes.
    pub max_segment_size: u64,
}

impl SegmentDescriptor {
    fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        buf[0..4].copy_from_slice(&DESCRIPTOR_MAGIC);
        buf[4] = DESCRIPTOR_VERSION;
        buf[8..16].copy_from_slice(&self.id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.first_index.to_le_bytes());
        buf[24..32].copy_from_slice(&self.max_segment_size.to_le_bytes());
        let crc = compute_checksum(&buf[..32]);
        buf[32..36].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; DESCRIPTOR_SIZE], path: &Path) -> Result<Self, JournalError> {
        let corrupt = |message: String| JournalError::CorruptSegment {
            path: path.to_path_buf(),
            offset: 0,
            message,
        };

        if buf[0..4] != DESCRIPTOR_MAGIC {
            return Err(corrupt("bad descriptor magic".to_string()));
        }
        if buf[4] != DESCRIPTOR_VERSION {
            return Err(corrupt(format!("unknown descriptor version {}", buf[4])));
        }
        let stored = read_u32(buf, 32);
        let actual = compute_checksum(&buf[..32]);
        if stored != actual {
            return Err(corrupt(format!(
                "descriptor checksum mismatch: expected {stored:#010x}, got {actual:#010x}"
            )));
        }

        let descriptor = Self {
            id: read_u64(buf, 8),
            first_index: read_u64(buf, 16),
            max_segment_size: read_u64(buf, 24),
        };
        if descriptor.first_index == 0 {
            return Err(corrupt("first index must be positive".to_string()));
        }
        Ok(descriptor)
    }
}

/// Public snapshot of a segment's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment id.
    pub id: u64,
    /// Index of the first record the segment covers.
    pub first_index: u64,
    /// Index of the last record, or `first_index - 1` when empty.
    pub last_index: u64,
    /// Path of the backing file.
    pub path: PathBuf,
    /// Whether the segment is sealed (read-only).
    pub sealed: bool,
    /// Bytes used, descriptor included.
    pub used_bytes: usize,
}

/// Describes where the recovery scan of a segment stopped early.
#[derive(Debug)]
pub(crate) struct ScanFailure {
    /// The index that was expected at `offset`.
    pub(crate) index: u64,
    /// Byte offset of the offending frame.
    pub(crate) offset: usize,
    /// Why the frame was rejected.
    pub(crate) cause: JournalError,
}

enum SegmentBuffer {
    Writable(MmapMut),
    Sealed(Mmap),
    Unmapped,
}

impl SegmentBuffer {
    #[inline]
    fn bytes(&self) -> &[u8] {
        match self {
            SegmentBuffer::Writable(mmap) => &mmap[..],
            SegmentBuffer::Sealed(mmap) => &mmap[..],
            SegmentBuffer::Unmapped => &[],
        }
    }
}

/// A single memory-mapped segment file.
pub(crate) struct Segment {
    descriptor: SegmentDescriptor,
    path: PathBuf,
    buffer: SegmentBuffer,
    /// Next free byte offset.
    write_pos: usize,
    /// Bytes up to here have been forced to stable storage.
    flushed_pos: usize,
    /// Last record index, `first_index - 1` when empty.
    last_index: u64,
    index: SparseIndex,
}

impl Segment {
    /// Create a new, empty, writable segment file.
    ///
    /// The file is pre-allocated to `descriptor.max_segment_size` bytes and
    /// the descriptor is flushed before returning.
    pub(crate) fn create(
        path: &Path,
        descriptor: SegmentDescriptor,
        index_density: u64,
    ) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(JournalError::io_at(path))?;

        file.set_len(descriptor.max_segment_size)
            .map_err(JournalError::io_at(path))?;

        // SAFETY: The journal directory is owned by this process and the file
        // is only resized while no mapping of it is alive.
        let mut mmap = unsafe { MmapMut::map_mut(&file).map_err(JournalError::io_at(path))? };

        mmap[..DESCRIPTOR_SIZE].copy_from_slice(&descriptor.encode());
        mmap.flush_range(0, DESCRIPTOR_SIZE)
            .map_err(JournalError::io_at(path))?;

        Ok(Self {
            descriptor,
            path: path.to_path_buf(),
            buffer: SegmentBuffer::Writable(mmap),
            write_pos: DESCRIPTOR_SIZE,
            flushed_pos: DESCRIPTOR_SIZE,
            last_index: descriptor.first_index - 1,
            index: SparseIndex::new(index_density),
        })
    }

    /// Open an existing segment read-only and scan its records.
    ///
    /// The scan stops at the end of written data or at the first frame that
    /// fails validation; in the latter case the failure is returned alongside
    /// the segment, whose cursor is left at the last verified record. The
    /// caller decides whether to [`repair_tail`](Self::repair_tail) or fail.
    pub(crate) fn open(
        path: &Path,
        expected_id: u64,
        index_density: u64,
    ) -> Result<(Self, Option<ScanFailure>), JournalError> {
        let mut file = File::open(path).map_err(JournalError::io_at(path))?;
        let len = file.metadata().map_err(JournalError::io_at(path))?.len();
        if len < DESCRIPTOR_SIZE as u64 {
            return Err(JournalError::CorruptSegment {
                path: path.to_path_buf(),
                offset: 0,
                message: format!("file has {len} bytes, shorter than the descriptor"),
            });
        }

        let mut header = [0u8; DESCRIPTOR_SIZE];
        file.read_exact(&mut header)
            .map_err(JournalError::io_at(path))?;
        let descriptor = SegmentDescriptor::decode(&header, path)?;
        if descriptor.id != expected_id {
            return Err(JournalError::CorruptSegment {
                path: path.to_path_buf(),
                offset: 0,
                message: format!(
                    "descriptor id {} does not match file name id {expected_id}",
                    descriptor.id
                ),
            });
        }

        // SAFETY: Read-only mapping; the journal directory is owned by this
        // process and the file is not resized while the mapping is alive.
        let mmap = unsafe { Mmap::map(&file).map_err(JournalError::io_at(path))? };

        let mut segment = Self {
            descriptor,
            path: path.to_path_buf(),
            buffer: SegmentBuffer::Sealed(mmap),
            write_pos: DESCRIPTOR_SIZE,
            flushed_pos: DESCRIPTOR_SIZE,
            last_index: descriptor.first_index - 1,
            index: SparseIndex::new(index_density),
        };
        let failure = segment.scan();
        segment.flushed_pos = segment.write_pos;
        Ok((segment, failure))
    }

    /// Walk every frame from the descriptor on, rebuilding the sparse index
    /// and the append cursor.
    fn scan(&mut self) -> Option<ScanFailure> {
        let mut offset = DESCRIPTOR_SIZE;
        let mut expected = self.descriptor.first_index;

        let failure = loop {
            match read_frame(self.buffer.bytes(), offset) {
                Ok(Frame::End) => break None,
                Ok(Frame::Record { record, frame_len }) => {
                    if record.index() != expected {
                        break Some(ScanFailure {
                            index: expected,
                            offset,
                            cause: JournalError::InvalidEntryHeader {
                                offset,
                                message: format!(
                                    "non-contiguous index {} (expected {expected})",
                                    record.index()
                                ),
                            },
                        });
                    }
                    self.index.index(expected, record.asqn(), offset);
                    offset += frame_len;
                    expected += 1;
                }
                Err(cause) => {
                    break Some(ScanFailure {
                        index: expected,
                        offset,
                        cause,
                    });
                }
            }
        };

        self.write_pos = offset;
        self.last_index = expected - 1;
        failure
    }

    /// Replace the current mapping.
    ///
    /// With `keep` set, the file is cut to `keep` bytes first (and synced), so
    /// everything after the cursor reads as zeros once re-extended. Writable
    /// mappings are always extended to the full segment size.
    fn remap(&mut self, writable: bool, keep: Option<usize>) -> Result<(), JournalError> {
        // Drop the old mapping before resizing the file underneath it.
        self.buffer = SegmentBuffer::Unmapped;
        let path = self.path.as_path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(JournalError::io_at(path))?;

        if let Some(keep) = keep {
            file.set_len(keep as u64).map_err(JournalError::io_at(path))?;
        }
        if writable {
            file.set_len(self.descriptor.max_segment_size)
                .map_err(JournalError::io_at(path))?;
        }
        if keep.is_some() {
            file.sync_all().map_err(JournalError::io_at(path))?;
        }

        self.buffer = if writable {
            // SAFETY: See `create`; the previous mapping was dropped above.
            SegmentBuffer::Writable(unsafe {
                MmapMut::map_mut(&file).map_err(JournalError::io_at(path))?
            })
        } else {
            // SAFETY: See `open`; the previous mapping was dropped above.
            SegmentBuffer::Sealed(unsafe { Mmap::map(&file).map_err(JournalError::io_at(path))? })
        };
        Ok(())
    }

    /// Make an opened segment the writable tail, discarding any bytes after
    /// the last verified record.
    pub(crate) fn repair_tail(&mut self) -> Result<(), JournalError> {
        let keep = self.write_pos;
        self.remap(true, Some(keep))?;
        self.flushed_pos = keep;
        Ok(())
    }

    /// Make an opened, intact segment the writable tail.
    pub(crate) fn unseal(&mut self) -> Result<(), JournalError> {
        if matches!(self.buffer, SegmentBuffer::Writable(_)) {
            return Ok(());
        }
        self.remap(true, None)
    }

    /// Flush and seal the segment: it is shrunk to its used size and mapped
    /// read-only.
    pub(crate) fn seal(&mut self) -> Result<(), JournalError> {
        self.flush()?;
        let keep = self.write_pos;
        self.remap(false, Some(keep))
    }

    /// Returns `true` if a frame of `frame_len` bytes fits after the cursor.
    #[inline]
    pub(crate) fn can_fit(&self, frame_len: usize) -> bool {
        self.write_pos
            .checked_add(frame_len)
            .is_some_and(|end| end as u64 <= self.descriptor.max_segment_size)
    }

    /// Append a record at the cursor and return its byte position.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::SegmentSealed`] for sealed segments,
    /// [`JournalError::InvalidIndex`] if the record does not continue the
    /// segment, and [`JournalError::EntryTooLarge`] if it does not fit.
    pub(crate) fn append(&mut self, record: &JournalRecord) -> Result<usize, JournalError> {
        let expected = self.last_index + 1;
        if record.index() != expected {
            return Err(JournalError::InvalidIndex {
                expected,
                actual: record.index(),
            });
        }

        let frame_len = record.frame_len();
        if !self.can_fit(frame_len) {
            return Err(JournalError::EntryTooLarge {
                entry_bytes: frame_len,
                segment_size: self.capacity(),
            });
        }

        let SegmentBuffer::Writable(mmap) = &mut self.buffer else {
            return Err(JournalError::SegmentSealed {
                id: self.descriptor.id,
            });
        };

        let position = self.write_pos;
        let end = position + frame_len;
        record.write_frame(&mut mmap[position..end]);

        self.index.index(record.index(), record.asqn(), position);
        self.write_pos = end;
        self.last_index = record.index();
        Ok(position)
    }

    /// Force written-but-unflushed bytes to stable storage.
    ///
    /// Returns `true` if anything was flushed.
    pub(crate) fn flush(&mut self) -> Result<bool, JournalError> {
        if self.flushed_pos >= self.write_pos {
            return Ok(false);
        }
        if let SegmentBuffer::Writable(mmap) = &self.buffer {
            mmap.flush_range(self.flushed_pos, self.write_pos - self.flushed_pos)
                .map_err(JournalError::io_at(&self.path))?;
        }
        self.flushed_pos = self.write_pos;
        Ok(true)
    }

    /// Decode the record whose frame starts at `position`.
    ///
    /// Returns the record and the position of the following frame, or `None`
    /// at the end of written data. Bytes past the cursor are never read.
    pub(crate) fn read_at(
        &self,
        position: usize,
    ) -> Result<Option<(JournalRecord, usize)>, JournalError> {
        let bytes = self.buffer.bytes();
        let limit = self.write_pos.min(bytes.len());
        match read_frame(&bytes[..limit], position)? {
            Frame::Record { record, frame_len } => Ok(Some((record, position + frame_len))),
            Frame::End => Ok(None),
        }
    }

    /// Byte length of the frame at `position`, without verifying it.
    fn frame_len_at(&self, position: usize) -> Option<usize> {
        let bytes = &self.buffer.bytes()[..self.write_pos.min(self.buffer.bytes().len())];
        let header = bytes.get(position..position.checked_add(5)?)?;
        if header[0] == 0 {
            return None;
        }
        Some(super::record::FRAME_HEADER_SIZE + read_u32(header, 1) as usize)
    }

    /// Byte position of the frame holding `index`, or `None` if the segment
    /// does not contain it.
    ///
    /// Starts from the closest sparse-index entry at or below `index`, so at
    /// most `index_density - 1` frames are skipped.
    pub(crate) fn seek_position(&self, index: u64) -> Result<Option<usize>, JournalError> {
        if index < self.descriptor.first_index || index > self.last_index {
            return Ok(None);
        }

        let (mut current, mut position) = match self.index.lookup(index) {
            Some(info) => (info.index, info.position),
            None => (self.descriptor.first_index, DESCRIPTOR_SIZE),
        };

        while current < index {
            position += self
                .frame_len_at(position)
                .ok_or_else(|| JournalError::InvalidEntryHeader {
                    offset: position,
                    message: format!("missing frame while seeking to index {index}"),
                })?;
            current += 1;
        }
        Ok(Some(position))
    }

    /// Read the record at `index`, if this segment holds it.
    pub(crate) fn get(&self, index: u64) -> Result<Option<JournalRecord>, JournalError> {
        match self.seek_position(index)? {
            Some(position) => Ok(self.read_at(position)?.map(|(record, _)| record)),
            None => Ok(None),
        }
    }

    /// Remove every record above `index`; the segment becomes the writable
    /// tail.
    pub(crate) fn truncate_after(&mut self, index: u64) -> Result<(), JournalError> {
        if index >= self.last_index && matches!(self.buffer, SegmentBuffer::Writable(_)) {
            return Ok(());
        }

        let keep_index = index.max(self.descriptor.first_index - 1);
        let keep = if keep_index >= self.last_index {
            self.write_pos
        } else {
            self.seek_position(keep_index + 1)?
                .ok_or_else(|| JournalError::InvalidEntryHeader {
                    offset: self.write_pos,
                    message: format!("index {} missing during truncation", keep_index + 1),
                })?
        };

        self.index.delete_after(keep_index);
        self.last_index = keep_index;
        self.write_pos = keep;
        self.flushed_pos = self.flushed_pos.min(keep);
        self.remap(true, Some(keep))
    }

    /// Last non-sentinel asqn stored in this segment.
    pub(crate) fn last_asqn(&self) -> Result<Option<i64>, JournalError> {
        let mut position = DESCRIPTOR_SIZE;
        let mut last = None;
        while let Some((record, next)) = self.read_at(position)? {
            if record.asqn() != super::record::ASQN_IGNORE {
                last = Some(record.asqn());
            }
            position = next;
        }
        Ok(last)
    }

    /// Unmap and remove the backing file.
    pub(crate) fn delete(mut self) -> Result<(), JournalError> {
        self.buffer = SegmentBuffer::Unmapped;
        fs::remove_file(&self.path).map_err(JournalError::io_at(&self.path))
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.descriptor.id
    }

    #[inline]
    pub(crate) fn first_index(&self) -> u64 {
        self.descriptor.first_index
    }

    #[inline]
    pub(crate) fn last_index(&self) -> u64 {
        self.last_index
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.last_index < self.descriptor.first_index
    }

    #[inline]
    pub(crate) fn is_sealed(&self) -> bool {
        !matches!(self.buffer, SegmentBuffer::Writable(_))
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub(crate) fn sparse_index(&self) -> &SparseIndex {
        &self.index
    }

    /// Usable bytes for frames.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        (self.descriptor.max_segment_size as usize).saturating_sub(DESCRIPTOR_SIZE)
    }

    pub(crate) fn info(&self) -> SegmentInfo {
        SegmentInfo {
            id: self.descriptor.id,
            first_index: self.descriptor.first_index,
            last_index: self.last_index,
            path: self.path.clone(),
            sealed: self.is_sealed(),
            used_bytes: self.write_pos,
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.descriptor.id)
            .field("first_index", &self.descriptor.first_index)
            .field("last_index", &self.last_index)
            .field("write_pos", &self.write_pos)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Build the path for a segment file given its id.
pub(crate) fn segment_path(dir: &Path, name: &str, id: u64) -> PathBuf {
    dir.join(format!("{name}-{id:020}.{SEGMENT_EXTENSION}"))
}

/// List the ids of all segment files for `name` in `dir`, sorted.
pub(crate) fn list_segments(dir: &Path, name: &str) -> Result<Vec<u64>, JournalError> {
    let mut ids = Vec::new();
    let prefix = format!("{name}-");
    let suffix = format!(".{SEGMENT_EXTENSION}");

    for entry in fs::read_dir(dir).map_err(JournalError::io_at(dir))? {
        let entry = entry.map_err(JournalError::io_at(dir))?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();

        if let Some(rest) = file_name.strip_prefix(prefix.as_str())
            && let Some(id) = rest.strip_suffix(suffix.as_str())
            && let Ok(id) = id.parse::<u64>()
        {
            ids.push(id);
        }
    }

    ids.sort_unstable();
    Ok(ids)
}

/// Returns `true` if the file at `path` never received its descriptor.
///
/// `create` sizes the file before the descriptor is written, so a crash in
/// between leaves a file that is too short or starts with zeros. Records are
/// only appended after the descriptor is flushed, so such a file holds none.
pub(crate) fn is_unwritten(path: &Path) -> Result<bool, JournalError> {
    let file = File::open(path).map_err(JournalError::io_at(path))?;
    let mut header = Vec::with_capacity(DESCRIPTOR_SIZE);
    file.take(DESCRIPTOR_SIZE as u64)
        .read_to_end(&mut header)
        .map_err(JournalError::io_at(path))?;
    Ok(header.len() < DESCRIPTOR_SIZE || header.iter().all(|&byte| byte == 0))
}
