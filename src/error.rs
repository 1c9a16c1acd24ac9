//! Crate-wide error type.

use thiserror::Error;

/// The result type returned by most functions in this crate.
pub type McapResult<T> = Result<T, McapError>;

/// Everything that can go wrong when reading or writing an MCAP file.
#[derive(Error, Debug)]
pub enum McapError {
    #[error("Bad magic number")]
    BadMagic,
    #[error("Bad footer")]
    BadFooter,
    #[error("Bad chunk CRC: expected {saved:08X}, calculated {calculated:08X}")]
    BadChunkCrc { saved: u32, calculated: u32 },
    #[error("Bad data section CRC: expected {saved:08X}, calculated {calculated:08X}")]
    BadDataSectionCrc { saved: u32, calculated: u32 },
    #[error("Bad summary CRC: expected {saved:08X}, calculated {calculated:08X}")]
    BadSummaryCrc { saved: u32, calculated: u32 },
    #[error("Bad attachment CRC: expected {saved:08X}, calculated {calculated:08X}")]
    BadAttachmentCrc { saved: u32, calculated: u32 },
    #[error("Schema length ({header}) in record header does not match available data ({available})")]
    BadSchemaLength { header: u32, available: u32 },
    #[error("Chunk length ({header}) in record header does not match available data ({available})")]
    BadChunkLength { header: u64, available: u64 },
    #[error("Attachment length ({header}) in record header does not match available data ({available})")]
    BadAttachmentLength { header: u64, available: u64 },
    #[error("Chunk start offset {0} is too large to compute a data offset from")]
    BadChunkStartOffset(u64),
    #[error("Record or index referenced data outside the bounds of the file")]
    BadIndex,
    #[error("Schema ID 0 is reserved for 'no schema'")]
    InvalidSchemaId,
    #[error("Channel {1} referenced by message with sequence {0} was never declared")]
    UnknownChannel(u32, u16),
    #[error("Channel on topic {0} references unknown schema ID {1}")]
    UnknownSchema(String, u16),
    #[error("Schema {0} was redeclared with conflicting contents")]
    ConflictingSchemas(String),
    #[error("Channel on topic {0} was redeclared with conflicting contents")]
    ConflictingChannels(String),
    #[error("Writer session ran out of schema IDs")]
    TooManySchemas,
    #[error("Writer session ran out of channel IDs")]
    TooManyChannels,
    #[error("Chunk buffer would be too large to allocate: {0} bytes")]
    ChunkBufferTooLarge(u64),
    #[error("No attachment is currently being written")]
    AttachmentNotInProgress,
    #[error("Attachment is {excess} bytes larger than its declared length {attachment_length}")]
    AttachmentTooLarge { excess: u64, attachment_length: u64 },
    #[error("Attachment is incomplete: wrote {current} of {expected} declared bytes")]
    AttachmentIncomplete { expected: u64, current: u64 },
    #[error("Unsupported compression format {0:?}")]
    UnsupportedCompression(String),
    #[error("Failed to decompress chunk: {0}")]
    DecompressionError(String),
    #[error("Decompressed chunk was {actual} bytes, chunk header declared {declared}")]
    UncompressedSizeMismatch { declared: u64, actual: u64 },
    #[error("Summary section could not be read and NoFallbackScan forbids a linear scan")]
    SummaryUnreadable,
    #[error("Summary section did not contain a Statistics record")]
    MissingStatistics,
    #[error("Summary section did not contain MessageIndex records for requested chunk")]
    MissingMessageIndex,
    #[error("Unexpected end of file")]
    UnexpectedEof,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error parsing record: {0}")]
    Binrw(#[from] binrw::Error),
}

impl From<McapError> for std::io::Error {
    fn from(e: McapError) -> Self {
        match e {
            McapError::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}
