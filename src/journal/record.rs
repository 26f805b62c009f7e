//! Journal records and their on-disk frame format.
//!
//! A [`JournalRecord`] is immutable once appended. Its serialized form is
//! the exact byte sequence that is checksummed, written to disk and shipped
//! to replicas, so two journals agree bit-for-bit on it for the same logical
//! record.
//!
//! # Serialized Record (little-endian)
//!
//! ```text
//! [8 bytes: index][8 bytes: asqn][4 bytes: payload_length][N bytes: payload]
//! ```
//!
//! # Frame (little-endian)
//!
//! ```text
//! [1 byte: frame_version][4 bytes: serialized_length][4 bytes: CRC32]
//! [serialized record]
//! ```
//!
//! - `frame_version` is `1`; a zero byte marks the end of written data in a
//!   pre-allocated segment.
//! - The CRC32 covers the serialized record only.

use super::checksum::compute_checksum;
use super::error::JournalError;
use bytes::Bytes;

/// Reserved asqn meaning "exempt from ordering enforcement".
///
/// Records appended with this value never advance the journal's asqn
/// watermark.
pub const ASQN_IGNORE: i64 = -1;

/// Current frame version. Zero is reserved for "no frame here".
pub const FRAME_VERSION: u8 = 1;

/// Size of the frame header in bytes: version, length and checksum.
pub const FRAME_HEADER_SIZE: usize = 1 + 4 + 4;

/// Size of the serialized record header in bytes: index, asqn and payload
/// length.
pub const RECORD_HEADER_SIZE: usize = 8 + 8 + 4;

/// Total overhead per record (frame header + record header) in bytes.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + RECORD_HEADER_SIZE;

/// Largest payload a single record can carry.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize - RECORD_HEADER_SIZE;

/// A single record of the journal.
///
/// Equality compares every field, including the serialized form and the
/// checksum, so a record read back from a replica compares equal to the one
/// appended on the leader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JournalRecord {
    index: u64,
    asqn: i64,
    checksum: u32,
    data: Bytes,
    serialized: Bytes,
}

impl JournalRecord {
    /// Create a record and compute its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::EntryTooLarge`] if the payload exceeds
    /// [`MAX_PAYLOAD_SIZE`].
    pub fn new(index: u64, asqn: i64, data: impl Into<Bytes>) -> Result<Self, JournalError> {
        let data = data.into();
        let serialized = Bytes::from(serialize_record(index, asqn, &data)?);
        let checksum = compute_checksum(&serialized);
        Ok(Self {
            index,
            asqn,
            checksum,
            data,
            serialized,
        })
    }

    /// Create a record carrying a checksum declared by someone else, e.g. a
    /// record received from a leader. The checksum is **not** verified here;
    /// the journal verifies it on append.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::EntryTooLarge`] if the payload exceeds
    /// [`MAX_PAYLOAD_SIZE`].
    pub fn with_checksum(
        index: u64,
        asqn: i64,
        checksum: u32,
        data: impl Into<Bytes>,
    ) -> Result<Self, JournalError> {
        let data = data.into();
        let serialized = Bytes::from(serialize_record(index, asqn, &data)?);
        Ok(Self {
            index,
            asqn,
            checksum,
            data,
            serialized,
        })
    }

    /// Decode a record from its serialized form and a declared checksum.
    ///
    /// The payload is a zero-copy slice of `serialized`. The checksum is
    /// **not** verified here.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidEntryHeader`] if the bytes are shorter
    /// than a record header or the payload length disagrees with the buffer.
    pub fn from_serialized(
        checksum: u32,
        serialized: impl Into<Bytes>,
    ) -> Result<Self, JournalError> {
        let serialized = serialized.into();
        let (index, asqn, data) = deserialize_record(&serialized, 0)?;
        Ok(Self {
            index,
            asqn,
            checksum,
            data,
            serialized,
        })
    }

    /// The position of this record in the journal (1-based).
    #[inline]
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The application sequence number, or [`ASQN_IGNORE`].
    #[inline]
    #[must_use]
    pub fn asqn(&self) -> i64 {
        self.asqn
    }

    /// The checksum stored with (or declared for) this record.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The opaque payload.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The exact serialized form, suitable for bit-exact replication via
    /// `SegmentedJournal::append_serialized`.
    #[inline]
    #[must_use]
    pub fn serialized_record(&self) -> &Bytes {
        &self.serialized
    }

    /// Checksum recomputed from the serialized form.
    #[must_use]
    pub fn computed_checksum(&self) -> u32 {
        compute_checksum(&self.serialized)
    }

    /// Returns `true` if the stored checksum matches the serialized form.
    #[must_use]
    pub fn has_valid_checksum(&self) -> bool {
        self.computed_checksum() == self.checksum
    }

    /// Total number of bytes this record occupies on disk.
    #[inline]
    #[must_use]
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.serialized.len()
    }

    /// Write the frame into `buf`, which must be exactly
    /// [`frame_len`](Self::frame_len) bytes long.
    ///
    /// The version byte is written last so that a partially written frame
    /// reads as end-of-data after a crash.
    pub(crate) fn write_frame(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.frame_len());
        let (header, body) = buf.split_at_mut(FRAME_HEADER_SIZE);
        body.copy_from_slice(&self.serialized);
        // serialized length was bounded by u32 in serialize_record
        header[1..5].copy_from_slice(&(self.serialized.len() as u32).to_le_bytes());
        header[5..9].copy_from_slice(&self.checksum.to_le_bytes());
        header[0] = FRAME_VERSION;
    }

    /// Encode the complete frame into a new buffer.
    #[must_use]
    pub fn encode_frame(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.frame_len()];
        self.write_frame(&mut buf);
        buf
    }
}

/// Serialize `(index, asqn, data)` into the record layout.
///
/// # Errors
///
/// Returns [`JournalError::EntryTooLarge`] if `data` exceeds
/// [`MAX_PAYLOAD_SIZE`].
pub fn serialize_record(index: u64, asqn: i64, data: &[u8]) -> Result<Vec<u8>, JournalError> {
    if data.len() > MAX_PAYLOAD_SIZE {
        return Err(JournalError::EntryTooLarge {
            entry_bytes: data.len().saturating_add(FRAME_OVERHEAD),
            segment_size: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + data.len());
    buf.extend_from_slice(&index.to_le_bytes());
    buf.extend_from_slice(&asqn.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Split a serialized record into `(index, asqn, payload)`.
///
/// `offset` is only used for error reporting.
fn deserialize_record(serialized: &Bytes, offset: usize) -> Result<(u64, i64, Bytes), JournalError> {
    let header = serialized
        .get(..RECORD_HEADER_SIZE)
        .ok_or_else(|| JournalError::InvalidEntryHeader {
            offset,
            message: format!(
                "serialized record has {} bytes, shorter than the {RECORD_HEADER_SIZE}-byte header",
                serialized.len()
            ),
        })?;

    let index = read_u64(header, 0);
    let asqn = read_u64(header, 8) as i64;
    let payload_len = read_u32(header, 16) as usize;

    let available = serialized.len() - RECORD_HEADER_SIZE;
    if payload_len != available {
        return Err(JournalError::InvalidEntryHeader {
            offset,
            message: format!(
                "payload length {payload_len} does not match the {available} bytes available"
            ),
        });
    }

    Ok((index, asqn, serialized.slice(RECORD_HEADER_SIZE..)))
}

/// The outcome of decoding the frame at a given position.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A complete, checksum-verified record occupying `frame_len` bytes.
    Record {
        record: JournalRecord,
        frame_len: usize,
    },
    /// No frame starts here (zero version byte or end of buffer).
    End,
}

/// Decode and verify the frame starting at `offset` in `buf`.
///
/// `buf` must end at the last byte that may belong to a frame (the segment's
/// write position for live segments), so that a torn frame is reported as
/// truncated instead of being read past its end.
///
/// # Errors
///
/// Returns [`JournalError::InvalidEntryHeader`] for unknown versions and
/// truncated frames, and [`JournalError::CorruptRecord`] on checksum
/// mismatch.
pub(crate) fn read_frame(buf: &[u8], offset: usize) -> Result<Frame, JournalError> {
    let version = match buf.get(offset) {
        None | Some(0) => return Ok(Frame::End),
        Some(v) => *v,
    };

    if version != FRAME_VERSION {
        return Err(JournalError::InvalidEntryHeader {
            offset,
            message: format!("unknown frame version {version}"),
        });
    }

    let header = offset
        .checked_add(FRAME_HEADER_SIZE)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| JournalError::InvalidEntryHeader {
            offset,
            message: "truncated frame header".to_string(),
        })?;

    let length = read_u32(header, 1) as usize;
    let stored_crc = read_u32(header, 5);

    if length < RECORD_HEADER_SIZE {
        return Err(JournalError::InvalidEntryHeader {
            offset,
            message: format!("frame length {length} is shorter than a record header"),
        });
    }

    let body_start = offset + FRAME_HEADER_SIZE;
    let serialized = body_start
        .checked_add(length)
        .and_then(|end| buf.get(body_start..end))
        .ok_or_else(|| JournalError::InvalidEntryHeader {
            offset,
            message: "truncated frame (extends beyond written data)".to_string(),
        })?;

    let actual_crc = compute_checksum(serialized);
    if actual_crc != stored_crc {
        return Err(JournalError::CorruptRecord {
            index: read_u64(serialized, 0),
            expected_crc: stored_crc,
            actual_crc,
        });
    }

    let serialized = Bytes::copy_from_slice(serialized);
    let (index, asqn, data) = deserialize_record(&serialized, offset)?;

    Ok(Frame::Record {
        record: JournalRecord {
            index,
            asqn,
            checksum: stored_crc,
            data,
            serialized,
        },
        frame_len: FRAME_HEADER_SIZE + length,
    })
}

/// Read a little-endian `u32` at `at`; callers guarantee the bounds.
#[inline]
pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

/// Read a little-endian `u64` at `at`; callers guarantee the bounds.
#[inline]
pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
