//! Writing MCAP files.
//!
//! [`Writer`] drives the whole session: declare schemas and channels, write
//! messages (and attachments and metadata records) in any order, and call
//! [`Writer::finish`] to flush the trailing summary section. By default
//! messages are buffered into compressed chunks; [`WriteOptions`] controls
//! chunking, compression, CRC validation, and which parts of the summary
//! section get written.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;

use binrw::BinWrite;
use byteorder::{WriteBytesExt, LE};

use crate::compress::{self, ChunkEncoder, Compression, CompressionLevel};
use crate::crc32;
use crate::records;
use crate::{Channel, Message, Schema};
use crate::{McapError, McapResult};

fn serialize<T>(value: &T) -> McapResult<Vec<u8>>
where
    for<'a> T: BinWrite<Args<'a> = ()>,
{
    let mut buf = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buf);
        value.write_le(&mut cursor).map_err(McapError::Binrw)?;
    }
    Ok(buf)
}

fn frame(opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + body.len());
    out.write_u8(opcode).expect("writing to a Vec never fails");
    out.write_u64::<LE>(body.len() as u64)
        .expect("writing to a Vec never fails");
    out.extend_from_slice(body);
    out
}

/// Knobs controlling how a [`Writer`] lays out a file.
///
/// Every boolean here defaults to "do the normal, fully-indexed thing"; set
/// one to `true` to trade some read-time convenience for a smaller or
/// simpler file.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    compression: Option<Compression>,
    compression_level: CompressionLevel,
    force_compression: bool,
    profile: String,
    library: String,
    chunk_size: Option<u64>,
    no_chunking: bool,
    no_crc: bool,
    no_message_index: bool,
    no_summary: bool,
    no_repeated_schemas: bool,
    no_repeated_channels: bool,
    no_attachment_index: bool,
    no_metadata_index: bool,
    no_chunk_index: bool,
    no_statistics: bool,
    no_summary_offsets: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Some(Compression::Zstd),
            compression_level: CompressionLevel::Default,
            force_compression: false,
            profile: String::new(),
            library: format!("mcap-rs-{}", env!("CARGO_PKG_VERSION")),
            chunk_size: Some(1024 * 1024),
            no_chunking: false,
            no_crc: false,
            no_message_index: false,
            no_summary: false,
            no_repeated_schemas: false,
            no_repeated_channels: false,
            no_attachment_index: false,
            no_metadata_index: false,
            no_chunk_index: false,
            no_statistics: false,
            no_summary_offsets: false,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, compression: Option<Compression>) -> Self {
        self.compression = compression;
        self
    }

    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    /// Keeps a compressed chunk even when compression didn't shrink it.
    ///
    /// By default, if compressing a chunk produces something no smaller than
    /// the uncompressed bytes, the chunk falls back to storing them
    /// uncompressed (`compression: ""`) instead of paying the decode cost for
    /// nothing.
    pub fn force_compression(mut self, force: bool) -> Self {
        self.force_compression = force;
        self
    }

    pub fn profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn library<S: Into<String>>(mut self, library: S) -> Self {
        self.library = library.into();
        self
    }

    /// Target uncompressed size, in bytes, at which a chunk is flushed.
    /// `None` disables size-triggered flushing (a chunk only ends at [`Writer::flush`]
    /// or [`Writer::finish`]).
    pub fn chunk_size(mut self, size: Option<u64>) -> Self {
        self.chunk_size = size;
        self
    }

    /// Disables chunking: every record is written directly to the data
    /// section, and no chunk/message indexes are produced.
    pub fn no_chunking(mut self, disable: bool) -> Self {
        self.no_chunking = disable;
        self
    }

    pub fn no_crc(mut self, disable: bool) -> Self {
        self.no_crc = disable;
        self
    }

    pub fn no_message_index(mut self, disable: bool) -> Self {
        self.no_message_index = disable;
        self
    }

    /// Skips writing the summary section entirely: the file is only readable
    /// by a linear scan.
    pub fn no_summary(mut self, disable: bool) -> Self {
        self.no_summary = disable;
        self
    }

    /// Omits the Schema group from the summary section. Schemas are still
    /// declared as usual in the data section (once per chunk that uses them).
    pub fn no_repeated_schemas(mut self, disable: bool) -> Self {
        self.no_repeated_schemas = disable;
        self
    }

    /// Omits the Channel group from the summary section. Channels are still
    /// declared as usual in the data section (once per chunk that uses them).
    pub fn no_repeated_channels(mut self, disable: bool) -> Self {
        self.no_repeated_channels = disable;
        self
    }

    pub fn no_attachment_index(mut self, disable: bool) -> Self {
        self.no_attachment_index = disable;
        self
    }

    pub fn no_metadata_index(mut self, disable: bool) -> Self {
        self.no_metadata_index = disable;
        self
    }

    pub fn no_chunk_index(mut self, disable: bool) -> Self {
        self.no_chunk_index = disable;
        self
    }

    pub fn no_statistics(mut self, disable: bool) -> Self {
        self.no_statistics = disable;
        self
    }

    pub fn no_summary_offsets(mut self, disable: bool) -> Self {
        self.no_summary_offsets = disable;
        self
    }

    /// Opens `writer`, writing the magic bytes and the Header record.
    pub fn create<W: Write + Seek>(self, writer: W) -> McapResult<Writer<W>> {
        Writer::new(writer, self)
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct SchemaKey {
    name: String,
    encoding: String,
    data: Vec<u8>,
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct ChannelKey {
    topic: String,
    message_encoding: String,
    schema_id: u16,
    metadata: BTreeMap<String, String>,
}

#[derive(Default)]
struct OpenChunk {
    message_start_time: u64,
    message_end_time: u64,
    uncompressed: Vec<u8>,
    indexes: BTreeMap<u16, Vec<records::MessageIndexEntry>>,
    declared_schemas: HashSet<u16>,
    declared_channels: HashSet<u16>,
}

/// A single MCAP write session.
///
/// Dropping a `Writer` without calling [`Writer::finish`] or
/// [`Writer::terminate`] first finishes it automatically, swallowing any
/// error; call `finish` explicitly to observe and handle write failures.
pub struct Writer<W: Write + Seek> {
    writer: Option<W>,
    options: WriteOptions,

    next_schema_id: u16,
    next_channel_id: u16,
    schema_ids: HashMap<SchemaKey, u16>,
    channel_ids: HashMap<ChannelKey, u16>,
    schemas: HashMap<u16, Arc<Schema<'static>>>,
    channels: HashMap<u16, Arc<Channel<'static>>>,

    declared_ever_schemas: HashSet<u16>,
    declared_ever_channels: HashSet<u16>,

    chunk: Option<OpenChunk>,
    chunk_indexes: Vec<records::ChunkIndex>,
    attachment_indexes: Vec<records::AttachmentIndex>,
    metadata_indexes: Vec<records::MetadataIndex>,

    message_bounds: Option<(u64, u64)>,
    channel_message_counts: BTreeMap<u16, u64>,
    attachment_count: u32,
    metadata_count: u32,
    chunk_count: u32,

    data_crc: crc32::Digest,
}

impl<W: Write + Seek> Writer<W> {
    fn new(mut writer: W, options: WriteOptions) -> McapResult<Self> {
        writer.write_all(crate::MAGIC)?;
        let header = records::Header {
            profile: options.profile.clone(),
            library: options.library.clone(),
        };
        let body = serialize(&header)?;
        let mut data_crc = crc32::Digest::new();
        let framed = frame(records::op::HEADER, &body);
        writer.write_all(&framed)?;
        if !options.no_crc {
            data_crc.update(&framed);
        }

        Ok(Self {
            writer: Some(writer),
            options,
            next_schema_id: 1,
            next_channel_id: 1,
            schema_ids: HashMap::new(),
            channel_ids: HashMap::new(),
            schemas: HashMap::new(),
            channels: HashMap::new(),
            declared_ever_schemas: HashSet::new(),
            declared_ever_channels: HashSet::new(),
            chunk: None,
            chunk_indexes: Vec::new(),
            attachment_indexes: Vec::new(),
            metadata_indexes: Vec::new(),
            message_bounds: None,
            channel_message_counts: BTreeMap::new(),
            attachment_count: 0,
            metadata_count: 0,
            chunk_count: 0,
            data_crc,
        })
    }

    fn sink(&mut self) -> &mut W {
        self.writer.as_mut().expect("writer used after finish/terminate")
    }

    /// Writes a top-level (non-chunked) record directly to the data section.
    fn write_top_level(&mut self, opcode: u8, body: &[u8]) -> McapResult<u64> {
        let offset = self.sink().stream_position()?;
        let framed = frame(opcode, body);
        self.sink().write_all(&framed)?;
        if !self.options.no_crc {
            self.data_crc.update(&framed);
        }
        Ok(offset)
    }

    /// Registers `schema`'s content if it hasn't been seen before, returning
    /// its assigned id. Calling this with content identical to a
    /// already-registered schema is a no-op that returns the existing id.
    pub fn add_schema(&mut self, schema: &Schema) -> McapResult<u16> {
        let key = SchemaKey {
            name: schema.name.clone(),
            encoding: schema.encoding.clone(),
            data: schema.data.clone().into_owned(),
        };
        if let Some(id) = self.schema_ids.get(&key) {
            return Ok(*id);
        }
        if self.next_schema_id == 0 {
            return Err(McapError::TooManySchemas);
        }
        let id = self.next_schema_id;
        self.next_schema_id = self.next_schema_id.checked_add(1).unwrap_or(0);

        self.schema_ids.insert(key, id);
        self.schemas.insert(
            id,
            Arc::new(Schema {
                id,
                name: schema.name.clone(),
                encoding: schema.encoding.clone(),
                data: Cow::Owned(schema.data.clone().into_owned()),
            }),
        );

        if self.options.no_chunking {
            let header = records::SchemaHeader {
                id,
                name: schema.name.clone(),
                encoding: schema.encoding.clone(),
            };
            let mut body = serialize(&header)?;
            body.extend_from_slice(&schema.data);
            self.write_top_level(records::op::SCHEMA, &body)?;
            self.declared_ever_schemas.insert(id);
        }
        Ok(id)
    }

    /// Registers `channel`'s content (topic, encoding, schema, metadata) if
    /// it hasn't been seen before, returning its assigned id.
    pub fn add_channel(&mut self, channel: &Channel) -> McapResult<u16> {
        let schema_id = match &channel.schema {
            Some(s) => self.add_schema(s)?,
            None => 0,
        };
        let key = ChannelKey {
            topic: channel.topic.clone(),
            message_encoding: channel.message_encoding.clone(),
            schema_id,
            metadata: channel.metadata.clone(),
        };
        if let Some(id) = self.channel_ids.get(&key) {
            return Ok(*id);
        }
        if self.next_channel_id == 0 {
            return Err(McapError::TooManyChannels);
        }
        let id = self.next_channel_id;
        self.next_channel_id = self.next_channel_id.checked_add(1).unwrap_or(0);

        self.channel_ids.insert(key, id);
        self.channels.insert(
            id,
            Arc::new(Channel {
                id,
                topic: channel.topic.clone(),
                message_encoding: channel.message_encoding.clone(),
                schema: channel.schema.clone(),
                metadata: channel.metadata.clone(),
            }),
        );

        if self.options.no_chunking {
            let record = records::Channel {
                id,
                schema_id,
                topic: channel.topic.clone(),
                message_encoding: channel.message_encoding.clone(),
                metadata: channel.metadata.clone(),
            };
            let body = serialize(&record)?;
            self.write_top_level(records::op::CHANNEL, &body)?;
            self.declared_ever_channels.insert(id);
        }
        Ok(id)
    }

    /// Ensures `schema` and `channel` are declared inside the currently open
    /// chunk, writing their records into the chunk buffer the first time each
    /// is used in that chunk. `no_repeated_schemas`/`no_repeated_channels`
    /// don't affect this — every chunk that uses a schema/channel carries its
    /// own copy so the chunk remains self-describing; those options instead
    /// control whether the schema/channel also appears in the summary section
    /// (see `finish`).
    fn declare_in_chunk(&mut self, channel_id: u16) -> McapResult<()> {
        let channel = self.channels.get(&channel_id).cloned().expect("channel already registered");

        if let Some(schema) = &channel.schema {
            let need = !self
                .chunk
                .as_ref()
                .map(|c| c.declared_schemas.contains(&schema.id))
                .unwrap_or(false);
            if need {
                let header = records::SchemaHeader {
                    id: schema.id,
                    name: schema.name.clone(),
                    encoding: schema.encoding.clone(),
                };
                let mut body = serialize(&header)?;
                body.extend_from_slice(&schema.data);
                let framed = frame(records::op::SCHEMA, &body);
                let chunk = self.chunk.as_mut().expect("chunk open");
                chunk.uncompressed.extend_from_slice(&framed);
                chunk.declared_schemas.insert(schema.id);
                self.declared_ever_schemas.insert(schema.id);
            }
        }

        let need = !self
            .chunk
            .as_ref()
            .map(|c| c.declared_channels.contains(&channel_id))
            .unwrap_or(false);
        if need {
            let record = records::Channel {
                id: channel.id,
                schema_id: channel.schema.as_ref().map(|s| s.id).unwrap_or(0),
                topic: channel.topic.clone(),
                message_encoding: channel.message_encoding.clone(),
                metadata: channel.metadata.clone(),
            };
            let body = serialize(&record)?;
            let framed = frame(records::op::CHANNEL, &body);
            let chunk = self.chunk.as_mut().expect("chunk open");
            chunk.uncompressed.extend_from_slice(&framed);
            chunk.declared_channels.insert(channel_id);
            self.declared_ever_channels.insert(channel_id);
        }

        Ok(())
    }

    /// Writes a single message.
    ///
    /// The message's channel (and schema, if any) are registered
    /// automatically if they haven't been already; this makes an explicit
    /// prior call to [`Writer::add_channel`] optional but harmless.
    pub fn write(&mut self, message: &Message) -> McapResult<()> {
        let channel_id = self.add_channel(&message.channel)?;

        self.channel_message_counts
            .entry(channel_id)
            .and_modify(|c| *c += 1)
            .or_insert(1);
        self.message_bounds = Some(match self.message_bounds {
            None => (message.log_time, message.log_time),
            Some((start, end)) => (start.min(message.log_time), end.max(message.log_time)),
        });

        let header = records::MessageHeader {
            channel_id,
            sequence: message.sequence,
            log_time: message.log_time,
            publish_time: message.publish_time,
        };

        if self.options.no_chunking {
            // The Schema/Channel records themselves were already written
            // directly to the data section by add_schema/add_channel above.
            let mut body = serialize(&header)?;
            body.extend_from_slice(&message.data);
            self.write_top_level(records::op::MESSAGE, &body)?;
            return Ok(());
        }

        if self.chunk.is_none() {
            self.chunk = Some(OpenChunk::default());
        }
        self.declare_in_chunk(channel_id)?;

        let chunk = self.chunk.as_mut().unwrap();
        if chunk.uncompressed.is_empty() {
            chunk.message_start_time = message.log_time;
            chunk.message_end_time = message.log_time;
        } else {
            chunk.message_start_time = chunk.message_start_time.min(message.log_time);
            chunk.message_end_time = chunk.message_end_time.max(message.log_time);
        }

        let offset_in_chunk = chunk.uncompressed.len() as u64;
        let mut body = serialize(&header)?;
        body.extend_from_slice(&message.data);
        let framed = frame(records::op::MESSAGE, &body);
        chunk.uncompressed.extend_from_slice(&framed);

        if !self.options.no_message_index {
            chunk
                .indexes
                .entry(channel_id)
                .or_default()
                .push(records::MessageIndexEntry {
                    log_time: message.log_time,
                    offset: offset_in_chunk,
                });
        }

        if let Some(target) = self.options.chunk_size {
            if self.chunk.as_ref().unwrap().uncompressed.len() as u64 >= target {
                self.finish_chunk()?;
            }
        }

        Ok(())
    }

    /// Flushes the current chunk, if any, writing its Chunk record, per-channel
    /// MessageIndex records, and recording its ChunkIndex entry.
    fn finish_chunk(&mut self) -> McapResult<()> {
        let chunk = match self.chunk.take() {
            Some(c) if !c.uncompressed.is_empty() => c,
            _ => return Ok(()),
        };

        let uncompressed_crc = if self.options.no_crc {
            0
        } else {
            crc32::checksum(&chunk.uncompressed)
        };

        let (compression_tag, compressed): (&'static str, Vec<u8>) = match self.options.compression {
            None => ("", Vec::new()),
            Some(c) => {
                let mut encoder = ChunkEncoder::new(Some(c), self.options.compression_level)?;
                encoder.write_all(&chunk.uncompressed)?;
                let compressed = encoder.finish()?;
                if !self.options.force_compression && compressed.len() >= chunk.uncompressed.len() {
                    ("", Vec::new())
                } else {
                    (compress::tag(Some(c)), compressed)
                }
            }
        };

        let (compression_tag, payload): (&'static str, &[u8]) = if compression_tag.is_empty() {
            ("", &chunk.uncompressed)
        } else {
            (compression_tag, &compressed)
        };

        let header = records::ChunkHeader {
            message_start_time: chunk.message_start_time,
            message_end_time: chunk.message_end_time,
            uncompressed_size: chunk.uncompressed.len() as u64,
            uncompressed_crc,
            compression: compression_tag.to_string(),
            compressed_size: payload.len() as u64,
        };

        let chunk_start_offset = self.sink().stream_position()?;
        let mut body = serialize(&header)?;
        body.extend_from_slice(payload);
        let framed = frame(records::op::CHUNK, &body);
        let chunk_length = framed.len() as u64;
        self.sink().write_all(&framed)?;
        if !self.options.no_crc {
            self.data_crc.update(&framed);
        }

        let mut message_index_offsets = BTreeMap::new();
        let mut message_index_length = 0u64;
        if !self.options.no_message_index {
            for (channel_id, entries) in &chunk.indexes {
                let offset = self.sink().stream_position()?;
                let record = records::MessageIndex {
                    channel_id: *channel_id,
                    records: entries.clone(),
                };
                let body = serialize(&record)?;
                let framed = frame(records::op::MESSAGE_INDEX, &body);
                message_index_length += framed.len() as u64;
                self.sink().write_all(&framed)?;
                if !self.options.no_crc {
                    self.data_crc.update(&framed);
                }
                message_index_offsets.insert(*channel_id, offset);
            }
        }

        log::debug!(
            "flushed chunk at offset {chunk_start_offset}: {} bytes uncompressed, {} bytes as {:?}",
            chunk.uncompressed.len(),
            payload.len(),
            self.options.compression,
        );

        self.chunk_count += 1;
        if !self.options.no_chunk_index {
            self.chunk_indexes.push(records::ChunkIndex {
                message_start_time: chunk.message_start_time,
                message_end_time: chunk.message_end_time,
                chunk_start_offset,
                chunk_length,
                message_index_offsets,
                message_index_length,
                compression: compression_tag.to_string(),
                compressed_size: payload.len() as u64,
                uncompressed_size: chunk.uncompressed.len() as u64,
            });
        }

        Ok(())
    }

    /// Flushes the current chunk to the underlying writer without closing the session.
    pub fn flush(&mut self) -> McapResult<()> {
        self.finish_chunk()?;
        self.sink().flush()?;
        Ok(())
    }

    /// Writes a one-shot attachment record outside of any chunk.
    pub fn attach(&mut self, attachment: &crate::Attachment) -> McapResult<()> {
        let header = records::AttachmentHeader {
            log_time: attachment.log_time,
            create_time: attachment.create_time,
            name: attachment.name.clone(),
            media_type: attachment.media_type.clone(),
        };
        let mut body = serialize(&header)?;
        body.extend_from_slice(&attachment.data);
        let crc = if self.options.no_crc {
            0
        } else {
            let mut digest = crc32::Digest::new();
            digest.update(&attachment.data);
            digest.finalize()
        };
        body.extend_from_slice(&crc.to_le_bytes());

        let offset = self.write_top_level(records::op::ATTACHMENT, &body)?;
        self.attachment_count += 1;
        if !self.options.no_attachment_index {
            self.attachment_indexes.push(records::AttachmentIndex {
                offset,
                length: 9 + body.len() as u64,
                log_time: attachment.log_time,
                create_time: attachment.create_time,
                data_size: attachment.data.len() as u64,
                name: attachment.name.clone(),
                media_type: attachment.media_type.clone(),
            });
        }
        Ok(())
    }

    /// Writes a metadata record outside of any chunk.
    pub fn write_metadata(&mut self, name: &str, metadata: BTreeMap<String, String>) -> McapResult<()> {
        let record = records::Metadata {
            name: name.to_string(),
            metadata,
        };
        let body = serialize(&record)?;
        let offset = self.write_top_level(records::op::METADATA, &body)?;
        self.metadata_count += 1;
        if !self.options.no_metadata_index {
            self.metadata_indexes.push(records::MetadataIndex {
                offset,
                length: 9 + body.len() as u64,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// A snapshot of the Statistics record as it would be written right now.
    pub fn statistics(&self) -> records::Statistics {
        let (start, end) = self.message_bounds.unwrap_or((0, 0));
        records::Statistics {
            message_count: self.channel_message_counts.values().sum(),
            schema_count: self.schemas.len() as u16,
            channel_count: self.channels.len() as u32,
            attachment_count: self.attachment_count,
            metadata_count: self.metadata_count,
            chunk_count: self.chunk_count,
            message_start_time: start,
            message_end_time: end,
            channel_message_counts: self.channel_message_counts.clone(),
        }
    }

    /// Writes the DataEnd record and, unless disabled, the full summary
    /// section, footer, and trailing magic. Consumes no state needed to keep
    /// writing more files via [`Writer::rotate`].
    pub fn finish(&mut self) -> McapResult<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.finish_chunk()?;

        let data_end = records::DataEnd {
            data_section_crc: if self.options.no_crc {
                0
            } else {
                self.data_crc.clone().finalize()
            },
        };
        let body = serialize(&data_end)?;
        self.write_top_level(records::op::DATA_END, &body)?;

        if self.options.no_summary {
            let footer = records::Footer {
                summary_start: 0,
                summary_offset_start: 0,
                summary_crc: 0,
            };
            let body = serialize(&footer)?;
            let framed = frame(records::op::FOOTER, &body);
            self.sink().write_all(&framed)?;
            self.sink().write_all(crate::MAGIC)?;
            return Ok(());
        }

        let summary_start = self.sink().stream_position()?;
        let mut summary_crc = crc32::Digest::new();
        let mut summary_offsets = Vec::new();

        let mut schemas: Vec<_> = self.schemas.values().cloned().collect();
        schemas.sort_by_key(|s| s.id);
        if !self.options.no_repeated_schemas && !schemas.is_empty() {
            let group_start = self.sink().stream_position()?;
            for schema in &schemas {
                let header = records::SchemaHeader {
                    id: schema.id,
                    name: schema.name.clone(),
                    encoding: schema.encoding.clone(),
                };
                let mut body = serialize(&header)?;
                body.extend_from_slice(&schema.data);
                let framed = frame(records::op::SCHEMA, &body);
                self.sink().write_all(&framed)?;
                summary_crc.update(&framed);
            }
            let group_end = self.sink().stream_position()?;
            summary_offsets.push((records::op::SCHEMA, group_start, group_end - group_start));
        }

        let mut channels: Vec<_> = self.channels.values().cloned().collect();
        channels.sort_by_key(|c| c.id);
        if !self.options.no_repeated_channels && !channels.is_empty() {
            let group_start = self.sink().stream_position()?;
            for channel in &channels {
                let record = records::Channel {
                    id: channel.id,
                    schema_id: channel.schema.as_ref().map(|s| s.id).unwrap_or(0),
                    topic: channel.topic.clone(),
                    message_encoding: channel.message_encoding.clone(),
                    metadata: channel.metadata.clone(),
                };
                let body = serialize(&record)?;
                let framed = frame(records::op::CHANNEL, &body);
                self.sink().write_all(&framed)?;
                summary_crc.update(&framed);
            }
            let group_end = self.sink().stream_position()?;
            summary_offsets.push((records::op::CHANNEL, group_start, group_end - group_start));
        }

        if !self.chunk_indexes.is_empty() {
            let group_start = self.sink().stream_position()?;
            for index in &self.chunk_indexes {
                let body = serialize(index)?;
                let framed = frame(records::op::CHUNK_INDEX, &body);
                self.sink().write_all(&framed)?;
                summary_crc.update(&framed);
            }
            let group_end = self.sink().stream_position()?;
            summary_offsets.push((records::op::CHUNK_INDEX, group_start, group_end - group_start));
        }

        if !self.attachment_indexes.is_empty() {
            let group_start = self.sink().stream_position()?;
            for index in &self.attachment_indexes {
                let body = serialize(index)?;
                let framed = frame(records::op::ATTACHMENT_INDEX, &body);
                self.sink().write_all(&framed)?;
                summary_crc.update(&framed);
            }
            let group_end = self.sink().stream_position()?;
            summary_offsets.push((records::op::ATTACHMENT_INDEX, group_start, group_end - group_start));
        }

        if !self.metadata_indexes.is_empty() {
            let group_start = self.sink().stream_position()?;
            for index in &self.metadata_indexes {
                let body = serialize(index)?;
                let framed = frame(records::op::METADATA_INDEX, &body);
                self.sink().write_all(&framed)?;
                summary_crc.update(&framed);
            }
            let group_end = self.sink().stream_position()?;
            summary_offsets.push((records::op::METADATA_INDEX, group_start, group_end - group_start));
        }

        if !self.options.no_statistics {
            let group_start = self.sink().stream_position()?;
            let stats = self.statistics();
            let body = serialize(&stats)?;
            let framed = frame(records::op::STATISTICS, &body);
            self.sink().write_all(&framed)?;
            summary_crc.update(&framed);
            let group_end = self.sink().stream_position()?;
            summary_offsets.push((records::op::STATISTICS, group_start, group_end - group_start));
        }

        let summary_offset_start = if self.options.no_summary_offsets {
            0
        } else {
            let start = self.sink().stream_position()?;
            for (opcode, group_start, group_length) in &summary_offsets {
                let record = records::SummaryOffset {
                    group_opcode: *opcode,
                    group_start: *group_start,
                    group_length: *group_length,
                };
                let body = serialize(&record)?;
                let framed = frame(records::op::SUMMARY_OFFSET, &body);
                self.sink().write_all(&framed)?;
                summary_crc.update(&framed);
            }
            start
        };

        let footer = records::Footer {
            summary_start,
            summary_offset_start,
            summary_crc: if self.options.no_crc {
                0
            } else {
                summary_crc.finalize()
            },
        };
        let body = serialize(&footer)?;
        let framed = frame(records::op::FOOTER, &body);
        self.sink().write_all(&framed)?;
        self.sink().write_all(crate::MAGIC)?;

        log::debug!(
            "finished writer session: {} chunks, {} schemas, {} channels",
            self.chunk_count,
            self.schemas.len(),
            self.channels.len(),
        );

        Ok(())
    }

    /// Finishes the current file and starts writing to `new_writer`,
    /// keeping the same schema/channel id allocation (ids are never reused,
    /// even across a rotation) but otherwise starting fresh: a new Header,
    /// an empty chunk index, and reset statistics.
    pub fn rotate(&mut self, new_writer: W) -> McapResult<W> {
        self.finish()?;
        let old = self.writer.take().expect("writer present after finish");

        let mut new_writer = new_writer;
        new_writer.write_all(crate::MAGIC)?;
        let header = records::Header {
            profile: self.options.profile.clone(),
            library: self.options.library.clone(),
        };
        let body = serialize(&header)?;
        let framed = frame(records::op::HEADER, &body);
        new_writer.write_all(&framed)?;

        self.data_crc = crc32::Digest::new();
        if !self.options.no_crc {
            self.data_crc.update(&framed);
        }
        self.writer = Some(new_writer);

        self.declared_ever_schemas.clear();
        self.declared_ever_channels.clear();
        self.chunk = None;
        self.chunk_indexes.clear();
        self.attachment_indexes.clear();
        self.metadata_indexes.clear();
        self.message_bounds = None;
        self.channel_message_counts.clear();
        self.attachment_count = 0;
        self.metadata_count = 0;
        self.chunk_count = 0;

        Ok(old)
    }

    /// Abandons the session immediately, without writing DataEnd or the
    /// summary section. Returns the underlying writer with whatever bytes
    /// had already been written.
    pub fn terminate(&mut self) -> Option<W> {
        self.writer.take()
    }
}

impl<W: Write + Seek> Drop for Writer<W> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
