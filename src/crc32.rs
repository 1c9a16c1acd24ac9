//! Streaming CRC-32 (IEEE, polynomial `0xEDB88320`) used for chunk, data-section,
//! summary, and attachment checksums.
//!
//! This is a thin wrapper over [`crc32fast`], which already implements the IEEE
//! variant spec'd here (reflected input/output, init `0xFFFFFFFF`, final XOR
//! `0xFFFFFFFF`); the wrapper exists so callers of this crate don't need to reach
//! for `crc32fast` directly just to validate a record.

use crc32fast::Hasher;

/// Computes the CRC-32 of a single buffer.
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// An incremental CRC-32 accumulator, for checksumming data as it's produced or
/// consumed in pieces (e.g. a chunk's bytes as they're written to the chunk buffer).
#[derive(Default, Clone)]
pub struct Digest(Hasher);

impl Digest {
    pub fn new() -> Self {
        Self(Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}
