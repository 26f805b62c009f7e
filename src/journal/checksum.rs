//! CRC32 checksums for journal records and segment descriptors.
//!
//! The checksum of a record covers its complete serialized form (index,
//! asqn, payload length and payload), so replicas that agree on the
//! serialized bytes always agree on the checksum.

/// Computes the CRC32 (IEEE) checksum of `data`.
#[inline]
#[must_use]
pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Returns `true` if the checksum of `data` equals `expected`.
#[inline]
#[must_use]
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}
