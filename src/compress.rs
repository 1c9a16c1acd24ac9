//! Compression adapters.
//!
//! A uniform interface over zstd, lz4, and pass-through, matching how the writer
//! picks a compressor per chunk and the reader picks a decompressor for whatever
//! tag the chunk was written with.

use std::io::Write;

use crate::{McapError, McapResult};

/// Which compressor to use for chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    #[cfg(feature = "zstd")]
    Zstd,
    #[cfg(feature = "lz4")]
    Lz4,
}

/// Compression effort, mapped onto each library's own level parameter at chunk
/// finalization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionLevel {
    Fastest,
    Fast,
    #[default]
    Default,
    Slow,
    Slowest,
}

impl CompressionLevel {
    /// Maps this level onto a zstd compression level (1-22, higher is slower/smaller).
    #[cfg(feature = "zstd")]
    pub(crate) fn zstd_level(self) -> i32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 0, // zstd's own "let the library pick" default
            CompressionLevel::Slow => 17,
            CompressionLevel::Slowest => 22,
        }
    }

    /// Maps this level onto an lz4 compression level (0-16, higher is slower/smaller).
    #[cfg(feature = "lz4")]
    pub(crate) fn lz4_level(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 0,
            CompressionLevel::Fast => 2,
            CompressionLevel::Default => 4,
            CompressionLevel::Slow => 9,
            CompressionLevel::Slowest => 16,
        }
    }
}

/// The compression tag written into a Chunk/ChunkIndex record's `compression` field.
pub(crate) fn tag(compression: Option<Compression>) -> &'static str {
    match compression {
        None => "",
        #[cfg(feature = "zstd")]
        Some(Compression::Zstd) => "zstd",
        #[cfg(feature = "lz4")]
        Some(Compression::Lz4) => "lz4",
    }
}

/// Decompresses a chunk's compressed payload into an owned buffer of exactly
/// `uncompressed_len` bytes.
///
/// This is the reader side of the "uniform compressed reader" interface from the
/// spec: given the compression tag recorded on the chunk, the compressed bytes,
/// and the declared uncompressed length, produce the decompressed bytes (or a
/// [`McapError::DecompressionError`]/[`McapError::UncompressedSizeMismatch`]).
pub fn decompress(tag: &str, compressed: &[u8], uncompressed_len: u64) -> McapResult<Vec<u8>> {
    let out = match tag {
        "" => compressed.to_vec(),
        #[cfg(feature = "zstd")]
        "zstd" => zstd::stream::decode_all(compressed)
            .map_err(|e| McapError::DecompressionError(e.to_string()))?,
        #[cfg(feature = "lz4")]
        "lz4" => {
            let mut decoder =
                lz4::Decoder::new(compressed).map_err(|e| McapError::DecompressionError(e.to_string()))?;
            let mut out = Vec::with_capacity(uncompressed_len as usize);
            std::io::copy(&mut decoder, &mut out)
                .map_err(|e| McapError::DecompressionError(e.to_string()))?;
            out
        }
        other => return Err(McapError::UnsupportedCompression(other.to_string())),
    };
    if out.len() as u64 != uncompressed_len {
        return Err(McapError::UncompressedSizeMismatch {
            declared: uncompressed_len,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

/// The writer-side encoder for a single chunk's bytes.
///
/// Buffers the uncompressed input and, on [`ChunkEncoder::finish`], returns both
/// the uncompressed bytes (for the CRC and fallback-to-uncompressed policy) and
/// the compressed bytes.
pub(crate) enum ChunkEncoder {
    None,
    #[cfg(feature = "zstd")]
    Zstd(zstd::Encoder<'static, Vec<u8>>),
    #[cfg(feature = "lz4")]
    Lz4(lz4::Encoder<Vec<u8>>),
}

impl ChunkEncoder {
    pub(crate) fn new(compression: Option<Compression>, level: CompressionLevel) -> McapResult<Self> {
        Ok(match compression {
            None => ChunkEncoder::None,
            #[cfg(feature = "zstd")]
            Some(Compression::Zstd) => {
                let mut enc = zstd::Encoder::new(Vec::new(), level.zstd_level())
                    .map_err(|e| McapError::DecompressionError(e.to_string()))?;
                #[cfg(not(target_arch = "wasm32"))]
                let _ = enc.multithread(num_cpus::get_physical() as u32);
                ChunkEncoder::Zstd(enc)
            }
            #[cfg(feature = "lz4")]
            Some(Compression::Lz4) => ChunkEncoder::Lz4(
                lz4::EncoderBuilder::new()
                    .level(level.lz4_level())
                    .block_checksum(lz4::liblz4::BlockChecksum::NoBlockChecksum)
                    .build(Vec::new())
                    .map_err(|e| McapError::DecompressionError(e.to_string()))?,
            ),
        })
    }

    pub(crate) fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            ChunkEncoder::None => Ok(()),
            #[cfg(feature = "zstd")]
            ChunkEncoder::Zstd(w) => w.write_all(buf),
            #[cfg(feature = "lz4")]
            ChunkEncoder::Lz4(w) => w.write_all(buf),
        }
    }

    /// Finishes compression, returning the compressed bytes. Pass-through mode
    /// never buffers anything separately from the caller's own uncompressed copy,
    /// so it returns an empty vec; callers must treat `None` specially.
    pub(crate) fn finish(self) -> McapResult<Vec<u8>> {
        match self {
            ChunkEncoder::None => Ok(Vec::new()),
            #[cfg(feature = "zstd")]
            ChunkEncoder::Zstd(w) => w.finish().map_err(McapError::Io),
            #[cfg(feature = "lz4")]
            ChunkEncoder::Lz4(w) => {
                let (buf, res) = w.finish();
                res?;
                Ok(buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_round_trips() {
        let data = b"the quick brown fox".to_vec();
        let decoded = decompress("", &data, data.len() as u64).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn unsupported_tag_errors() {
        let err = decompress("snappy", b"whatever", 8).unwrap_err();
        assert!(matches!(err, McapError::UnsupportedCompression(tag) if tag == "snappy"));
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_round_trips() {
        let data: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let mut enc = ChunkEncoder::new(Some(Compression::Zstd), CompressionLevel::Fastest).unwrap();
        enc.write_all(&data).unwrap();
        let compressed = enc.finish().unwrap();
        let decoded = decompress("zstd", &compressed, data.len() as u64).unwrap();
        assert_eq!(decoded, data);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_round_trips() {
        let data: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let mut enc = ChunkEncoder::new(Some(Compression::Lz4), CompressionLevel::Default).unwrap();
        enc.write_all(&data).unwrap();
        let compressed = enc.finish().unwrap();
        let decoded = decompress("lz4", &compressed, data.len() as u64).unwrap();
        assert_eq!(decoded, data);
    }
}
