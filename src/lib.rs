//! A library for reading and writing [MCAP](https://mcap.dev) files.
//!
//! MCAP is a self-describing container format for heterogeneous, time-indexed
//! binary messages — the kind of thing robotics stacks and other sensor-heavy
//! systems log to disk. A file holds any number of channels, each optionally
//! tagged with a schema that tells consumers how to interpret its messages.
//! Files can be read either by streaming forward through every record
//! ([`read::LinearReader`]), or, once a trailing summary has been written, by
//! seeking and iterating messages in time order ([`indexed_reader::IndexedReader`]).
//!
//! This crate treats message payloads as opaque bytes: it does not know how to
//! decode Protobuf, JSON, or ROS messages, only how to frame and index them.

pub mod channels;
pub mod compress;
pub mod crc32;
pub mod error;
pub mod indexed_reader;
pub mod io;
pub mod read;
pub mod records;
pub mod write;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use compress::{Compression, CompressionLevel};
pub use error::{McapError, McapResult};
pub use indexed_reader::{IndexedReader, Problem, ReadOrder, RecordOffset, SummaryReadMethod};
pub use read::{LinearReader, MessageStream, Summary};
pub use write::{Writer, WriteOptions};

/// The eight bytes that must open and close every MCAP file.
pub const MAGIC: &[u8] = &[0x89, b'M', b'C', b'A', b'P', 0x30, b'\r', b'\n'];

/// A schema describing how to interpret messages on one or more channels.
///
/// Schemas are immutable once registered in a writer session or read out of a
/// file; a given schema id always refers to the same content for the lifetime
/// of the file or session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema<'a> {
    /// The nonzero id this schema was assigned. Id `0` is reserved for "no schema"
    /// and never appears here — a channel with no schema simply has `None`.
    pub id: u16,
    pub name: String,
    /// The encoding of `data`, e.g. `"protobuf"` or `"jsonschema"`. An empty string
    /// means the schema has no serialized representation beyond its name.
    pub encoding: String,
    pub data: Cow<'a, [u8]>,
}

/// A channel: a named, typed stream of messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel<'a> {
    pub id: u16,
    pub topic: String,
    /// The encoding of each message's `data`, e.g. `"protobuf"` or `"json"`.
    pub message_encoding: String,
    pub schema: Option<Arc<Schema<'a>>>,
    pub metadata: BTreeMap<String, String>,
}

/// A single message on a channel.
///
/// `log_time` is the canonical ordering key used by the indexed reader;
/// `publish_time` is informational (when the message was produced, as opposed
/// to when it was logged/received).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<'a> {
    pub channel: Arc<Channel<'a>>,
    pub sequence: u32,
    pub log_time: u64,
    pub publish_time: u64,
    pub data: Cow<'a, [u8]>,
}

/// An attachment: a named external blob, stored outside of chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment<'a> {
    pub log_time: u64,
    pub create_time: u64,
    pub name: String,
    pub media_type: String,
    pub data: Cow<'a, [u8]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_eight_bytes() {
        assert_eq!(MAGIC.len(), 8);
        assert_eq!(MAGIC, b"\x89MCAP0\r\n");
    }
}
