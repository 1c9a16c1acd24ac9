//! Writing to and reading back from an actual file on disk, and a few
//! options-surface and error-path checks that don't fit `round_trip.rs`.

use std::borrow::Cow;
use std::fs;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use assert_matches::assert_matches;

use mcap::indexed_reader::{IndexedReader, Problem, ReadOrder, SummaryReadMethod};
use mcap::write::WriteOptions;
use mcap::{Channel, McapError, Message};

fn channel() -> Arc<Channel<'static>> {
    Arc::new(Channel {
        id: 0,
        topic: "/topic".into(),
        message_encoding: "none".into(),
        schema: None,
        metadata: Default::default(),
    })
}

#[test]
fn writing_to_a_real_file_and_reading_it_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.mcap");

    {
        let file = fs::File::create(&path)?;
        let mut writer = WriteOptions::new().create(file)?;
        let chan = channel();
        writer.add_channel(&chan)?;
        writer.write(&Message {
            channel: chan,
            sequence: 0,
            log_time: 42,
            publish_time: 42,
            data: Cow::Borrowed(b"from disk"),
        })?;
        writer.finish()?;
    }

    let bytes = fs::read(&path)?;
    let reader = IndexedReader::open(&bytes, SummaryReadMethod::NoFallbackScan)?;
    let messages = reader.read_messages(0, u64::MAX, ReadOrder::FileOrder, None, |_| {})?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data.as_ref(), b"from disk");
    Ok(())
}

#[test]
fn no_chunking_option_skips_chunk_indexes() -> Result<()> {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new()
            .no_chunking(true)
            .create(Cursor::new(&mut buf))?;
        let chan = channel();
        writer.add_channel(&chan)?;
        for i in 0..10u64 {
            writer.write(&Message {
                channel: chan.clone(),
                sequence: i as u32,
                log_time: i,
                publish_time: i,
                data: Cow::Borrowed(b"x"),
            })?;
        }
        writer.finish()?;
    }

    let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan)?;
    assert!(reader.chunk_indexes().is_empty());

    // A file with no chunks at all still has to be readable via fallback
    // scan (there's nothing to reconstruct, but it shouldn't error).
    let scanned = IndexedReader::open(&buf, SummaryReadMethod::ForceScan)?;
    assert_eq!(scanned.channels().len(), 1);
    Ok(())
}

#[test]
fn tampering_with_chunk_bytes_is_caught_by_crc() -> Result<()> {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new()
            .compression(None)
            .create(Cursor::new(&mut buf))?;
        let chan = channel();
        writer.add_channel(&chan)?;
        writer.write(&Message {
            channel: chan,
            sequence: 0,
            log_time: 1,
            publish_time: 1,
            data: Cow::Borrowed(b"original"),
        })?;
        writer.finish()?;
    }

    // Flip a byte inside the chunk's message payload.
    let needle = b"original";
    let pos = buf
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("payload bytes should be findable in an uncompressed chunk");
    buf[pos] ^= 0xFF;

    let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan)?;
    let mut problems = Vec::new();
    let messages = reader.read_messages(0, u64::MAX, ReadOrder::FileOrder, None, |p| problems.push(p))?;

    // The corrupt chunk is skipped rather than aborting the whole read.
    assert!(messages.is_empty());
    assert_eq!(problems.len(), 1);
    assert_matches!(
        &problems[0],
        Problem::BadChunk {
            error: McapError::BadChunkCrc { .. },
            ..
        }
    );
    Ok(())
}

#[test]
fn summary_read_fails_without_fallback_when_no_summary_was_written() -> Result<()> {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new()
            .no_summary(true)
            .create(Cursor::new(&mut buf))?;
        let chan = channel();
        writer.add_channel(&chan)?;
        writer.write(&Message {
            channel: chan,
            sequence: 0,
            log_time: 1,
            publish_time: 1,
            data: Cow::Borrowed(b"x"),
        })?;
        writer.finish()?;
    }

    let result = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan);
    assert_matches!(result, Err(McapError::SummaryUnreadable));

    let scanned = IndexedReader::open(&buf, SummaryReadMethod::AllowFallbackScan)?;
    assert_eq!(scanned.channels().len(), 1);
    Ok(())
}
