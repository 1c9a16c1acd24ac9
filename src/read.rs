//! Streaming, forward-only reading of MCAP records and messages.
//!
//! [`LinearReader`] walks the data section one record at a time, exactly as
//! the bytes appear in the file, and is the building block everything else in
//! this module is built from. [`MessageStream`] sits on top of it: it tracks
//! the schemas and channels declared so far, transparently decompresses
//! chunks, and hands back fully resolved [`Message`]s in file order.
//!
//! [`Summary`] reads the trailing summary section (schemas, channels, and the
//! various index records) without touching the data section at all, which is
//! what [`crate::indexed_reader::IndexedReader`] is built on.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use binrw::BinRead;
use byteorder::{ByteOrder, LE};

use crate::channels::ChannelAccumulator;
use crate::compress;
use crate::crc32;
use crate::records::{self, op};
use crate::{Channel, Message, Schema};
use crate::{McapError, McapResult};
use crate::io::Readable;

/// Parses the body of a single record, given its opcode and raw bytes.
///
/// `body` is expected to be exactly the record's declared length; callers are
/// responsible for slicing it out of the file first.
pub fn parse_record(opcode: u8, body: Cow<'_, [u8]>) -> McapResult<records::Record<'_>> {
    fn read<T: for<'a> BinRead<Args<'a> = ()>>(body: &[u8]) -> McapResult<T> {
        let mut cursor = Cursor::new(body);
        T::read_le(&mut cursor).map_err(McapError::Binrw)
    }

    Ok(match opcode {
        op::HEADER => records::Record::Header(read(&body)?),
        op::FOOTER => records::Record::Footer(read(&body)?),
        op::SCHEMA => {
            let mut cursor = Cursor::new(&body[..]);
            let header: records::SchemaHeader =
                records::SchemaHeader::read_le(&mut cursor).map_err(McapError::Binrw)?;
            let data_start = cursor.position() as usize;
            let data = match body {
                Cow::Borrowed(b) => Cow::Borrowed(&b[data_start..]),
                Cow::Owned(b) => Cow::Owned(b[data_start..].to_vec()),
            };
            records::Record::Schema { header, data }
        }
        op::CHANNEL => records::Record::Channel(read(&body)?),
        op::MESSAGE => {
            let mut cursor = Cursor::new(&body[..]);
            let header: records::MessageHeader =
                records::MessageHeader::read_le(&mut cursor).map_err(McapError::Binrw)?;
            let data_start = header.serialized_len() as usize;
            let data = match body {
                Cow::Borrowed(b) => Cow::Borrowed(&b[data_start..]),
                Cow::Owned(b) => Cow::Owned(b[data_start..].to_vec()),
            };
            records::Record::Message { header, data }
        }
        op::CHUNK => {
            let mut cursor = Cursor::new(&body[..]);
            let header: records::ChunkHeader =
                records::ChunkHeader::read_le(&mut cursor).map_err(McapError::Binrw)?;
            let data_start = cursor.position() as usize;
            let data = match body {
                Cow::Borrowed(b) => Cow::Borrowed(&b[data_start..]),
                Cow::Owned(b) => Cow::Owned(b[data_start..].to_vec()),
            };
            records::Record::Chunk { header, data }
        }
        op::MESSAGE_INDEX => records::Record::MessageIndex(read(&body)?),
        op::CHUNK_INDEX => records::Record::ChunkIndex(read(&body)?),
        op::ATTACHMENT => {
            if body.len() < 4 {
                return Err(McapError::UnexpectedEof);
            }
            let crc_start = body.len() - 4;
            let crc = u32::from_le_bytes(body[crc_start..].try_into().unwrap());
            let mut cursor = Cursor::new(&body[..crc_start]);
            let header: records::AttachmentHeader =
                records::AttachmentHeader::read_le(&mut cursor).map_err(McapError::Binrw)?;
            let data_start = cursor.position() as usize;
            let data = match body {
                Cow::Borrowed(b) => Cow::Borrowed(&b[data_start..crc_start]),
                Cow::Owned(ref b) => Cow::Owned(b[data_start..crc_start].to_vec()),
            };
            records::Record::Attachment { header, data, crc }
        }
        op::ATTACHMENT_INDEX => records::Record::AttachmentIndex(read(&body)?),
        op::STATISTICS => records::Record::Statistics(read(&body)?),
        op::METADATA => records::Record::Metadata(read(&body)?),
        op::METADATA_INDEX => records::Record::MetadataIndex(read(&body)?),
        op::SUMMARY_OFFSET => records::Record::SummaryOffset(read(&body)?),
        op::DATA_END => records::Record::DataEnd(read(&body)?),
        other => records::Record::Unknown { opcode: other, data: body },
    })
}

/// Reads the length-prefixed `(opcode, body)` framing for one record starting
/// at `pos`, returning the parsed record and the offset just past it.
fn read_framed_record<'a, R: Readable + ?Sized>(
    reader: &'a R,
    pos: u64,
) -> McapResult<(records::Record<'a>, u64)> {
    let header = reader.read(pos, 9)?;
    let opcode = header[0];
    let len = LE::read_u64(&header[1..9]);
    let body_start = pos + 9;
    let body = reader.read(body_start, len)?;
    let record = parse_record(opcode, Cow::Borrowed(body))?;
    Ok((record, body_start + len))
}

/// Forward-only iterator over the top-level records of an MCAP file's data
/// section, exactly as framed on disk.
///
/// This does not decompress chunks or track schemas/channels; it is the raw
/// record stream that [`MessageStream`] and [`Summary`] are both built on.
pub struct LinearReader<'a, R: Readable + ?Sized> {
    reader: &'a R,
    pos: u64,
    end: u64,
    errored: bool,
}

impl<'a, R: Readable + ?Sized> LinearReader<'a, R> {
    /// Creates a reader over the whole file, validating the leading and
    /// trailing magic bytes.
    pub fn new(reader: &'a R) -> McapResult<Self> {
        let size = reader.size();
        if size < (crate::MAGIC.len() * 2) as u64 {
            return Err(McapError::BadMagic);
        }
        if reader.read(0, crate::MAGIC.len() as u64)? != crate::MAGIC {
            return Err(McapError::BadMagic);
        }
        if reader.read(size - crate::MAGIC.len() as u64, crate::MAGIC.len() as u64)? != crate::MAGIC {
            return Err(McapError::BadMagic);
        }
        Self::new_in_range(reader, crate::MAGIC.len() as u64, size - crate::MAGIC.len() as u64)
    }

    /// Creates a reader over an explicit byte range, with no magic validation.
    ///
    /// Used internally to walk the data section and the summary section,
    /// both of which are just runs of framed records bounded by other means.
    pub(crate) fn new_in_range(reader: &'a R, start: u64, end: u64) -> McapResult<Self> {
        Ok(Self { reader, pos: start, end, errored: false })
    }
}

impl<'a, R: Readable + ?Sized> Iterator for LinearReader<'a, R> {
    type Item = McapResult<records::Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored || self.pos >= self.end {
            return None;
        }
        match read_framed_record(self.reader, self.pos) {
            Ok((record, next_pos)) => {
                self.pos = next_pos;
                Some(Ok(record))
            }
            Err(e) => {
                self.errored = true;
                Some(Err(e))
            }
        }
    }
}

/// Decompresses a chunk's payload, validating its CRC if one was recorded.
pub(crate) fn decompress_chunk_bytes(header: &records::ChunkHeader, data: &[u8]) -> McapResult<Vec<u8>> {
    let decompressed = compress::decompress(&header.compression, data, header.uncompressed_size)?;
    if header.uncompressed_crc != 0 {
        let calculated = crc32::checksum(&decompressed);
        if calculated != header.uncompressed_crc {
            return Err(McapError::BadChunkCrc {
                saved: header.uncompressed_crc,
                calculated,
            });
        }
    }
    Ok(decompressed)
}

/// A message read out of the data section, with its channel not yet resolved.
#[derive(Debug, Clone)]
pub struct RawMessage<'a> {
    pub header: records::MessageHeader,
    pub data: Cow<'a, [u8]>,
}

/// Walks the data section, transparently flattening chunks, and resolves each
/// message's channel (and that channel's schema, if any) against the
/// schemas/channels declared so far.
///
/// Declarations may appear either at the top level or inside chunks; both are
/// fed into the same [`ChannelAccumulator`], matching how a writer is allowed
/// to place repeated Schema/Channel records inside every chunk that uses them.
pub struct MessageStream<'a, R: Readable + ?Sized> {
    reader: LinearReader<'a, R>,
    channeler: ChannelAccumulator<'static>,
    pending: std::collections::VecDeque<RawMessage<'static>>,
    errored: bool,
}

impl<'a, R: Readable + ?Sized> MessageStream<'a, R> {
    pub fn new(reader: &'a R) -> McapResult<Self> {
        Ok(Self {
            reader: LinearReader::new(reader)?,
            channeler: ChannelAccumulator::default(),
            pending: std::collections::VecDeque::new(),
            errored: false,
        })
    }

    fn drain_chunk(&mut self, header: &records::ChunkHeader, data: &[u8]) -> McapResult<()> {
        let decompressed = decompress_chunk_bytes(header, data)?;
        let mut pos = 0u64;
        let len = decompressed.len() as u64;
        while pos < len {
            let op = decompressed[pos as usize];
            let rec_len = u64::from_le_bytes(
                decompressed[(pos as usize + 1)..(pos as usize + 9)].try_into().unwrap(),
            );
            let body_start = (pos + 9) as usize;
            let body_end = body_start + rec_len as usize;
            let body = decompressed
                .get(body_start..body_end)
                .ok_or(McapError::UnexpectedEof)?
                .to_vec();
            let record = parse_record(op, Cow::Owned(body))?.into_owned();
            match record {
                records::Record::Schema { header, data } => {
                    self.channeler.add_schema(header, data)?;
                }
                records::Record::Channel(chan) => {
                    self.channeler.add_channel(chan)?;
                }
                records::Record::Message { header, data } => {
                    self.pending.push_back(RawMessage { header, data });
                }
                _ => {}
            }
            pos = body_end as u64;
        }
        Ok(())
    }
}

impl<'a, R: Readable + ?Sized> Iterator for MessageStream<'a, R> {
    type Item = McapResult<Message<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        loop {
            if let Some(raw) = self.pending.pop_front() {
                let channel = match self.channeler.get(raw.header.channel_id) {
                    Some(c) => c,
                    None => {
                        self.errored = true;
                        return Some(Err(McapError::UnknownChannel(
                            raw.header.sequence,
                            raw.header.channel_id,
                        )));
                    }
                };
                return Some(Ok(Message {
                    channel,
                    sequence: raw.header.sequence,
                    log_time: raw.header.log_time,
                    publish_time: raw.header.publish_time,
                    data: raw.data,
                }));
            }

            match self.reader.next()? {
                Ok(records::Record::Schema { header, data }) => {
                    if let Err(e) = self.channeler.add_schema(header, Cow::Owned(data.into_owned())) {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                Ok(records::Record::Channel(chan)) => {
                    if let Err(e) = self.channeler.add_channel(chan) {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                Ok(records::Record::Message { header, data }) => {
                    self.pending.push_back(RawMessage {
                        header,
                        data: Cow::Owned(data.into_owned()),
                    });
                }
                Ok(records::Record::Chunk { header, data }) => {
                    if let Err(e) = self.drain_chunk(&header, &data) {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                Ok(records::Record::Unknown { opcode, .. }) => {
                    log::trace!("skipping unknown record with opcode {opcode:#04x}");
                }
                Ok(_) => continue,
                Err(e) => {
                    self.errored = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Reads the footer record at the end of the file (the eight bytes of
/// trailing magic, plus the 29-byte framed Footer record just before it).
pub fn footer<R: Readable + ?Sized>(reader: &R) -> McapResult<records::Footer> {
    let size = reader.size();
    const FOOTER_RECORD_LEN: u64 = 1 + 8 + 20;
    let total = FOOTER_RECORD_LEN + crate::MAGIC.len() as u64;
    if size < total {
        return Err(McapError::BadFooter);
    }
    let footer_start = size - total;
    let (record, end) = read_framed_record(reader, footer_start)?;
    if end != size - crate::MAGIC.len() as u64 {
        return Err(McapError::BadFooter);
    }
    match record {
        records::Record::Footer(f) => Ok(f),
        _ => Err(McapError::BadFooter),
    }
}

/// Everything recorded in a file's trailing summary section: schemas,
/// channels, and the various index records, without touching the data
/// section at all.
#[derive(Default)]
pub struct Summary {
    pub stats: Option<records::Statistics>,
    pub channels: HashMap<u16, Arc<Channel<'static>>>,
    pub schemas: HashMap<u16, Arc<Schema<'static>>>,
    pub chunk_indexes: Vec<records::ChunkIndex>,
    pub attachment_indexes: Vec<records::AttachmentIndex>,
    pub metadata_indexes: Vec<records::MetadataIndex>,
    pub summary_offsets: Vec<records::SummaryOffset>,
}

impl Summary {
    /// Reads the summary section, if the file has one and it's well-formed.
    ///
    /// Returns `Ok(None)` when the footer's `summary_start` is zero (no
    /// summary was written). A nonzero, nonzero-CRC summary whose checksum
    /// doesn't match is reported as [`McapError::BadSummaryCrc`].
    pub fn read<R: Readable + ?Sized>(reader: &R) -> McapResult<Option<Self>> {
        let foot = footer(reader)?;
        if foot.summary_start == 0 {
            return Ok(None);
        }

        let size = reader.size();
        const FOOTER_RECORD_LEN: u64 = 1 + 8 + 20;
        let footer_record_start = size - crate::MAGIC.len() as u64 - FOOTER_RECORD_LEN;

        if foot.summary_crc != 0 {
            let region = reader.read(foot.summary_start, footer_record_start - foot.summary_start)?;
            let calculated = crc32::checksum(region);
            if calculated != foot.summary_crc {
                return Err(McapError::BadSummaryCrc {
                    saved: foot.summary_crc,
                    calculated,
                });
            }
        }

        let mut summary = Summary::default();
        let records = LinearReader::new_in_range(reader, foot.summary_start, footer_record_start)?;
        let mut accumulator = ChannelAccumulator::default();
        for record in records {
            match record? {
                records::Record::Schema { header, data } => {
                    accumulator.add_schema(header, Cow::Owned(data.into_owned()))?;
                }
                records::Record::Channel(chan) => {
                    accumulator.add_channel(chan)?;
                }
                records::Record::Statistics(s) => summary.stats = Some(s),
                records::Record::ChunkIndex(c) => summary.chunk_indexes.push(c),
                records::Record::AttachmentIndex(a) => summary.attachment_indexes.push(a),
                records::Record::MetadataIndex(m) => summary.metadata_indexes.push(m),
                records::Record::SummaryOffset(o) => summary.summary_offsets.push(o),
                _ => {}
            }
        }
        summary.schemas = accumulator.schemas;
        summary.channels = accumulator.channels;

        Ok(Some(summary))
    }

    /// Decompresses and parses every message inside the chunk at `index`, in
    /// the order they appear in the chunk.
    pub fn stream_chunk<'a, R: Readable + ?Sized>(
        &self,
        reader: &'a R,
        index: &records::ChunkIndex,
    ) -> McapResult<Vec<Message<'static>>> {
        let (header, body_start) = read_chunk_header(reader, index)?;
        let compressed = reader.read(body_start, header.compressed_size)?;
        let decompressed = decompress_chunk_bytes(&header, compressed)?;

        let mut accumulator = ChannelAccumulator::default();
        for (id, schema) in &self.schemas {
            accumulator.schemas.insert(*id, schema.clone());
        }
        for (id, channel) in &self.channels {
            accumulator.channels.insert(*id, channel.clone());
        }

        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < decompressed.len() {
            let op = decompressed[pos];
            let rec_len =
                u64::from_le_bytes(decompressed[pos + 1..pos + 9].try_into().unwrap()) as usize;
            let body = decompressed[pos + 9..pos + 9 + rec_len].to_vec();
            let record = parse_record(op, Cow::Owned(body))?.into_owned();
            match record {
                records::Record::Schema { header, data } => accumulator.add_schema(header, data)?,
                records::Record::Channel(chan) => accumulator.add_channel(chan)?,
                records::Record::Message { header, data } => {
                    let channel = accumulator
                        .get(header.channel_id)
                        .ok_or(McapError::UnknownChannel(header.sequence, header.channel_id))?;
                    out.push(Message {
                        channel,
                        sequence: header.sequence,
                        log_time: header.log_time,
                        publish_time: header.publish_time,
                        data,
                    });
                }
                _ => {}
            }
            pos += 9 + rec_len;
        }
        Ok(out)
    }

    /// Reads the per-channel message index records trailing the chunk at `index`.
    pub fn read_message_indexes<R: Readable + ?Sized>(
        &self,
        reader: &R,
        index: &records::ChunkIndex,
    ) -> McapResult<HashMap<u16, Vec<records::MessageIndexEntry>>> {
        let mut out = HashMap::new();
        if index.message_index_offsets.is_empty() {
            return Ok(out);
        }
        let start = *index.message_index_offsets.values().min().unwrap();
        let end = index.chunk_start_offset + index.chunk_length + index.message_index_length;
        let records = LinearReader::new_in_range(reader, start, end)?;
        for record in records {
            if let records::Record::MessageIndex(mi) = record? {
                out.insert(mi.channel_id, mi.records);
            }
        }
        Ok(out)
    }
}

fn read_chunk_header<R: Readable + ?Sized>(
    reader: &R,
    index: &records::ChunkIndex,
) -> McapResult<(records::ChunkHeader, u64)> {
    let data_offset = index.compressed_data_offset()?;
    let header_bytes = reader.read(index.chunk_start_offset + 9, data_offset - (index.chunk_start_offset + 9))?;
    let mut cursor = Cursor::new(header_bytes);
    let header =
        records::ChunkHeader::read_le(&mut cursor).map_err(McapError::Binrw)?;
    Ok((header, data_offset))
}

/// Reads a single attachment out of the file given its summary index entry.
pub fn attachment<'a, R: Readable + ?Sized>(
    reader: &'a R,
    index: &records::AttachmentIndex,
) -> McapResult<crate::Attachment<'a>> {
    let (record, _) = read_framed_record(reader, index.offset)?;
    match record {
        records::Record::Attachment { header, data, crc } => {
            if crc != 0 {
                let calculated = crc32::checksum(&data);
                if calculated != crc {
                    return Err(McapError::BadAttachmentCrc { saved: crc, calculated });
                }
            }
            Ok(crate::Attachment {
                log_time: header.log_time,
                create_time: header.create_time,
                name: header.name,
                media_type: header.media_type,
                data,
            })
        }
        _ => Err(McapError::BadIndex),
    }
}

/// Reads a single metadata record out of the file given its summary index entry.
pub fn metadata<R: Readable + ?Sized>(
    reader: &R,
    index: &records::MetadataIndex,
) -> McapResult<records::Metadata> {
    let (record, _) = read_framed_record(reader, index.offset)?;
    match record {
        records::Record::Metadata(m) => Ok(m),
        _ => Err(McapError::BadIndex),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::{WriteOptions, Writer};
    use std::io::Cursor as IoCursor;

    fn tiny_file() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = WriteOptions::new().create(IoCursor::new(&mut buf)).unwrap();
            let schema = Arc::new(Schema {
                id: 0,
                name: "s".into(),
                encoding: "none".into(),
                data: Cow::Borrowed(&[]),
            });
            let channel = Arc::new(Channel {
                id: 0,
                topic: "t".into(),
                message_encoding: "none".into(),
                schema: Some(schema),
                metadata: Default::default(),
            });
            writer.add_channel(&channel).unwrap();
            writer
                .write(&Message {
                    channel,
                    sequence: 0,
                    log_time: 1,
                    publish_time: 1,
                    data: Cow::Borrowed(b"hello"),
                })
                .unwrap();
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn linear_reader_sees_every_top_level_record() {
        let buf = tiny_file();
        let reader = LinearReader::new(&buf).unwrap();
        let opcodes: Vec<u8> = reader.map(|r| r.unwrap().opcode()).collect();
        assert!(opcodes.contains(&op::HEADER));
        assert!(opcodes.contains(&op::DATA_END));
    }

    #[test]
    fn message_stream_resolves_channel() {
        let buf = tiny_file();
        let messages: Vec<_> = MessageStream::new(&buf).unwrap().collect::<McapResult<_>>().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data.as_ref(), b"hello");
        assert_eq!(messages[0].channel.topic, "t");
    }

    #[test]
    fn summary_round_trips_stats() {
        let buf = tiny_file();
        let summary = Summary::read(&buf).unwrap().expect("should have a summary");
        assert_eq!(summary.stats.unwrap().message_count, 1);
    }
}
