//! Seek-based reading in time order, backed by a file's summary section.
//!
//! Where [`crate::read::MessageStream`] can only walk a file forward exactly
//! as it's laid out on disk, [`IndexedReader`] uses the chunk and message
//! indexes recorded in the summary section to read an arbitrary time range,
//! in file order or sorted by log time in either direction, without
//! decompressing chunks outside that range.

use byteorder::{ByteOrder, LE};

use crate::io::Readable;
use crate::read::Summary;
use crate::records;
use crate::{McapError, McapResult, Message};

/// How a message's position in the file compares to another's: first by byte
/// offset of the record (or its containing chunk), then, for two messages in
/// the same chunk, by their offset within that chunk.
///
/// Ordered lexicographically, so two `RecordOffset`s from different chunks
/// compare by `byte_offset` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordOffset {
    pub byte_offset: u64,
    pub chunk_offset: Option<u64>,
}

/// The order in which [`IndexedReader::read_messages`] yields messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrder {
    /// The order chunks and messages appear in the file.
    FileOrder,
    /// Ascending `log_time`, ties broken by file position.
    LogTimeOrder,
    /// Descending `log_time`, ties broken by reverse file position.
    ReverseLogTimeOrder,
}

/// How [`IndexedReader::open`] should respond to a missing or unreadable
/// summary section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryReadMethod {
    /// Fail rather than fall back to scanning the whole file.
    NoFallbackScan,
    /// Fall back to a linear scan if the summary is missing or unreadable.
    AllowFallbackScan,
    /// Always build the index by scanning the whole file, ignoring any
    /// existing summary section.
    ForceScan,
}

struct QueuedMessage {
    log_time: u64,
    offset: RecordOffset,
    message: Message<'static>,
}

/// A non-fatal issue encountered while iterating messages.
///
/// Framing/integrity errors confined to a single chunk don't abort the whole
/// read: the offending chunk is skipped and reported here instead, matching
/// how a file with one corrupt chunk should still yield every other message.
#[derive(Debug)]
pub enum Problem {
    /// A chunk failed to decompress or parse (bad CRC, truncated record,
    /// unsupported compression tag...); every message inside it is skipped.
    BadChunk {
        chunk_start_offset: u64,
        error: McapError,
    },
}

/// Reads messages from an MCAP file in time order (or file order) using its
/// summary section, a chunk at a time.
pub struct IndexedReader<'a, R: Readable + ?Sized> {
    reader: &'a R,
    summary: Summary,
}

impl<'a, R: Readable + ?Sized> IndexedReader<'a, R> {
    /// Opens `reader`, reading its summary section according to `method`.
    ///
    /// Under [`SummaryReadMethod::NoFallbackScan`], a summary that parses but
    /// is missing its Statistics record or any chunk's MessageIndex records
    /// is rejected with [`McapError::MissingStatistics`]/
    /// [`McapError::MissingMessageIndex`] rather than silently accepted: a
    /// caller that wants to tolerate those gaps should use
    /// [`SummaryReadMethod::AllowFallbackScan`] or
    /// [`SummaryReadMethod::ForceScan`] instead.
    pub fn open(reader: &'a R, method: SummaryReadMethod) -> McapResult<Self> {
        if method == SummaryReadMethod::ForceScan {
            return Ok(Self {
                reader,
                summary: Self::scan_summary(reader)?,
            });
        }

        let summary = match Summary::read(reader) {
            Ok(Some(summary)) => summary,
            Ok(None) => match method {
                SummaryReadMethod::NoFallbackScan => return Err(McapError::SummaryUnreadable),
                _ => Self::scan_summary(reader)?,
            },
            Err(e) => match method {
                SummaryReadMethod::NoFallbackScan => return Err(e),
                _ => Self::scan_summary(reader)?,
            },
        };

        if method == SummaryReadMethod::NoFallbackScan {
            if summary.stats.is_none() {
                return Err(McapError::MissingStatistics);
            }
            if summary
                .chunk_indexes
                .iter()
                .any(|c| c.message_index_offsets.is_empty())
            {
                return Err(McapError::MissingMessageIndex);
            }
        }

        Ok(Self { reader, summary })
    }

    /// Builds a [`Summary`]-equivalent view by walking the whole data section
    /// with [`crate::read::LinearReader`], used when a file has no summary
    /// section (or [`SummaryReadMethod::ForceScan`] was requested).
    fn scan_summary(reader: &'a R) -> McapResult<Summary> {
        use crate::channels::ChannelAccumulator;
        use crate::read::LinearReader;

        log::warn!("rebuilding index by scanning the whole file; no usable summary section was found");

        let mut accumulator = ChannelAccumulator::default();
        let mut summary = Summary::default();

        let size = reader.size();
        let records = LinearReader::new_in_range(reader, crate::MAGIC.len() as u64, size - crate::MAGIC.len() as u64)?;
        for record in records {
            match record? {
                records::Record::Schema { header, data } => {
                    accumulator.add_schema(header, std::borrow::Cow::Owned(data.into_owned()))?;
                }
                records::Record::Channel(chan) => {
                    accumulator.add_channel(chan)?;
                }
                records::Record::ChunkIndex(c) => summary.chunk_indexes.push(c),
                records::Record::AttachmentIndex(a) => summary.attachment_indexes.push(a),
                records::Record::MetadataIndex(m) => summary.metadata_indexes.push(m),
                records::Record::Statistics(s) => summary.stats = Some(s),
                records::Record::Chunk { header, data } => {
                    // A chunk with no corresponding ChunkIndex record (e.g. a
                    // file whose summary was never finished): decompress once
                    // to pull out any schemas/channels it declares, and
                    // synthesize a ChunkIndex so it's still reachable by
                    // read_messages.
                    let decompressed = crate::read::decompress_chunk_bytes(&header, &data)?;
                    let mut pos = 0usize;
                    while pos < decompressed.len() {
                        let op = decompressed[pos];
                        let len = LE::read_u64(&decompressed[pos + 1..pos + 9]) as usize;
                        let body = decompressed[pos + 9..pos + 9 + len].to_vec();
                        match crate::read::parse_record(op, std::borrow::Cow::Owned(body))?.into_owned() {
                            records::Record::Schema { header, data } => {
                                accumulator.add_schema(header, data)?;
                            }
                            records::Record::Channel(chan) => {
                                accumulator.add_channel(chan)?;
                            }
                            _ => {}
                        }
                        pos += 9 + len;
                    }
                }
                _ => {}
            }
        }

        summary.schemas = accumulator.schemas;
        summary.channels = accumulator.channels;
        Ok(summary)
    }

    pub fn schemas(&self) -> &std::collections::HashMap<u16, std::sync::Arc<crate::Schema<'static>>> {
        &self.summary.schemas
    }

    pub fn channels(&self) -> &std::collections::HashMap<u16, std::sync::Arc<crate::Channel<'static>>> {
        &self.summary.channels
    }

    pub fn statistics(&self) -> Option<&records::Statistics> {
        self.summary.stats.as_ref()
    }

    pub fn chunk_indexes(&self) -> &[records::ChunkIndex] {
        &self.summary.chunk_indexes
    }

    /// The smallest byte range of the file that must be read to cover every
    /// chunk overlapping `[start, end)`.
    pub fn byte_range(&self, start: u64, end: u64) -> Option<(u64, u64)> {
        let mut range: Option<(u64, u64)> = None;
        for idx in &self.summary.chunk_indexes {
            if idx.message_end_time < start || idx.message_start_time >= end {
                continue;
            }
            let chunk_end = idx.chunk_start_offset + idx.chunk_length;
            range = Some(match range {
                None => (idx.chunk_start_offset, chunk_end),
                Some((s, e)) => (s.min(idx.chunk_start_offset), e.max(chunk_end)),
            });
        }
        range
    }

    /// Reads every message with `start <= log_time < end` (topics optionally
    /// restricted to `topics`), in the order given by `order`.
    ///
    /// Every overlapping chunk is decompressed once, in full; this method
    /// materializes its result eagerly rather than streaming record-by-record.
    /// A chunk that fails to decompress or parse is skipped rather than
    /// aborting the whole read; `problem` is called once per skipped chunk.
    pub fn read_messages(
        &self,
        start: u64,
        end: u64,
        order: ReadOrder,
        topics: Option<&[String]>,
        mut problem: impl FnMut(Problem),
    ) -> McapResult<Vec<Message<'static>>> {
        let mut queued: Vec<QueuedMessage> = Vec::new();

        for idx in &self.summary.chunk_indexes {
            if idx.message_end_time < start || idx.message_start_time >= end {
                continue;
            }
            let messages = match self.summary.stream_chunk(self.reader, idx) {
                Ok(messages) => messages,
                Err(error) => {
                    problem(Problem::BadChunk {
                        chunk_start_offset: idx.chunk_start_offset,
                        error,
                    });
                    continue;
                }
            };
            for (i, message) in messages.into_iter().enumerate() {
                if message.log_time < start || message.log_time >= end {
                    continue;
                }
                if let Some(topics) = topics {
                    if !topics.iter().any(|t| t == &message.channel.topic) {
                        continue;
                    }
                }
                let offset = RecordOffset {
                    byte_offset: idx.chunk_start_offset,
                    chunk_offset: Some(i as u64),
                };
                queued.push(QueuedMessage {
                    log_time: message.log_time,
                    offset,
                    message,
                });
            }
        }

        match order {
            ReadOrder::FileOrder => queued.sort_by_key(|q| q.offset),
            ReadOrder::LogTimeOrder => queued.sort_by_key(|q| (q.log_time, q.offset)),
            ReadOrder::ReverseLogTimeOrder => {
                queued.sort_by(|a, b| {
                    b.log_time
                        .cmp(&a.log_time)
                        .then_with(|| b.offset.cmp(&a.offset))
                });
            }
        }

        Ok(queued.into_iter().map(|q| q.message).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::WriteOptions;
    use crate::{Channel, Message, Schema};
    use std::borrow::Cow;
    use std::io::Cursor;
    use std::sync::Arc;

    fn sample_file() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = WriteOptions::new()
                .chunk_size(Some(16))
                .create(Cursor::new(&mut buf))
                .unwrap();
            let channel = Arc::new(Channel {
                id: 0,
                topic: "t".into(),
                message_encoding: "none".into(),
                schema: None,
                metadata: Default::default(),
            });
            writer.add_channel(&channel).unwrap();
            for log_time in [5u64, 1, 3] {
                writer
                    .write(&Message {
                        channel: channel.clone(),
                        sequence: 0,
                        log_time,
                        publish_time: log_time,
                        data: Cow::Borrowed(b"x"),
                    })
                    .unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn log_time_order_sorts_across_chunks() {
        let buf = sample_file();
        let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
        let messages = reader
            .read_messages(0, u64::MAX, ReadOrder::LogTimeOrder, None, |_| {})
            .unwrap();
        let times: Vec<u64> = messages.iter().map(|m| m.log_time).collect();
        assert_eq!(times, vec![1, 3, 5]);
    }

    #[test]
    fn reverse_log_time_order() {
        let buf = sample_file();
        let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
        let messages = reader
            .read_messages(0, u64::MAX, ReadOrder::ReverseLogTimeOrder, None, |_| {})
            .unwrap();
        let times: Vec<u64> = messages.iter().map(|m| m.log_time).collect();
        assert_eq!(times, vec![5, 3, 1]);
    }

    #[test]
    fn time_range_filters_messages() {
        let buf = sample_file();
        let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
        let messages = reader
            .read_messages(2, 5, ReadOrder::LogTimeOrder, None, |_| {})
            .unwrap();
        let times: Vec<u64> = messages.iter().map(|m| m.log_time).collect();
        assert_eq!(times, vec![3]);
    }

    #[test]
    fn force_scan_matches_indexed_read() {
        let buf = sample_file();
        let indexed = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
        let scanned = IndexedReader::open(&buf, SummaryReadMethod::ForceScan).unwrap();
        let a = indexed
            .read_messages(0, u64::MAX, ReadOrder::LogTimeOrder, None, |_| {})
            .unwrap();
        let b = scanned
            .read_messages(0, u64::MAX, ReadOrder::LogTimeOrder, None, |_| {})
            .unwrap();
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn no_fallback_scan_rejects_summary_missing_statistics() {
        let mut buf = Vec::new();
        {
            let mut writer = WriteOptions::new()
                .no_statistics(true)
                .create(Cursor::new(&mut buf))
                .unwrap();
            let channel = Arc::new(Channel {
                id: 0,
                topic: "t".into(),
                message_encoding: "none".into(),
                schema: None,
                metadata: Default::default(),
            });
            writer.add_channel(&channel).unwrap();
            writer
                .write(&Message {
                    channel,
                    sequence: 0,
                    log_time: 1,
                    publish_time: 1,
                    data: Cow::Borrowed(b"x"),
                })
                .unwrap();
            writer.finish().unwrap();
        }

        assert!(matches!(
            IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan),
            Err(McapError::MissingStatistics)
        ));
        assert!(IndexedReader::open(&buf, SummaryReadMethod::AllowFallbackScan).is_ok());
    }

    #[test]
    fn no_fallback_scan_rejects_summary_missing_message_index() {
        let mut buf = Vec::new();
        {
            let mut writer = WriteOptions::new()
                .no_message_index(true)
                .create(Cursor::new(&mut buf))
                .unwrap();
            let channel = Arc::new(Channel {
                id: 0,
                topic: "t".into(),
                message_encoding: "none".into(),
                schema: None,
                metadata: Default::default(),
            });
            writer.add_channel(&channel).unwrap();
            writer
                .write(&Message {
                    channel,
                    sequence: 0,
                    log_time: 1,
                    publish_time: 1,
                    data: Cow::Borrowed(b"x"),
                })
                .unwrap();
            writer.finish().unwrap();
        }

        assert!(matches!(
            IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan),
            Err(McapError::MissingMessageIndex)
        ));
        assert!(IndexedReader::open(&buf, SummaryReadMethod::AllowFallbackScan).is_ok());
    }
}
