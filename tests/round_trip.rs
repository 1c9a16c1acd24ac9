//! End-to-end round trips: everything written through [`mcap::write::Writer`]
//! comes back out the same way through both reader types.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use mcap::indexed_reader::{IndexedReader, ReadOrder, SummaryReadMethod};
use mcap::read::MessageStream;
use mcap::write::WriteOptions;
use mcap::{Channel, Message, Schema};

fn channel(topic: &str) -> Arc<Channel<'static>> {
    Arc::new(Channel {
        id: 0,
        topic: topic.into(),
        message_encoding: "json".into(),
        schema: Some(Arc::new(Schema {
            id: 0,
            name: "my_schema".into(),
            encoding: "jsonschema".into(),
            data: Cow::Borrowed(b"{}"),
        })),
        metadata: Default::default(),
    })
}

#[test]
fn tiny_round_trip() {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new().create(Cursor::new(&mut buf)).unwrap();
        let chan = channel("/topic");
        writer.add_channel(&chan).unwrap();
        writer
            .write(&Message {
                channel: chan,
                sequence: 1,
                log_time: 100,
                publish_time: 100,
                data: Cow::Borrowed(b"payload"),
            })
            .unwrap();
        writer.finish().unwrap();
    }

    let messages: Vec<_> = MessageStream::new(&buf).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data.as_ref(), b"payload");
    assert_eq!(messages[0].channel.topic, "/topic");
    assert_eq!(messages[0].channel.schema.as_ref().unwrap().name, "my_schema");
}

#[test]
fn messages_written_out_of_order_come_back_in_log_time_order() {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new()
            .chunk_size(None)
            .create(Cursor::new(&mut buf))
            .unwrap();
        let chan = channel("/topic");
        writer.add_channel(&chan).unwrap();
        for log_time in [0u64, 2, 1] {
            writer
                .write(&Message {
                    channel: chan.clone(),
                    sequence: log_time as u32,
                    log_time,
                    publish_time: log_time,
                    data: Cow::Borrowed(b"x"),
                })
                .unwrap();
        }
        writer.finish().unwrap();
    }

    // MessageStream preserves file order (the order they were written)...
    let file_order: Vec<u64> = MessageStream::new(&buf)
        .unwrap()
        .map(|m| m.unwrap().log_time)
        .collect();
    assert_eq!(file_order, vec![0, 2, 1]);

    // ...while the indexed reader can sort by log time.
    let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
    let sorted: Vec<u64> = reader
        .read_messages(0, u64::MAX, ReadOrder::LogTimeOrder, None, |_| {})
        .unwrap()
        .into_iter()
        .map(|m| m.log_time)
        .collect();
    assert_eq!(sorted, vec![0, 1, 2]);
}

#[test]
fn chunk_rotation_by_size_produces_several_chunks() {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new()
            .chunk_size(Some(200))
            .compression(None)
            .create(Cursor::new(&mut buf))
            .unwrap();
        let chan = channel("/topic");
        writer.add_channel(&chan).unwrap();
        for i in 0..100u64 {
            writer
                .write(&Message {
                    channel: chan.clone(),
                    sequence: i as u32,
                    log_time: i,
                    publish_time: i,
                    data: Cow::Owned(vec![0u8; 20]),
                })
                .unwrap();
        }
        writer.finish().unwrap();
    }

    let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
    assert!(
        reader.chunk_indexes().len() > 1,
        "expected more than one chunk, got {}",
        reader.chunk_indexes().len()
    );

    let messages = reader
        .read_messages(0, u64::MAX, ReadOrder::LogTimeOrder, None, |_| {})
        .unwrap();
    assert_eq!(messages.len(), 100);
    for (i, m) in messages.iter().enumerate() {
        assert_eq!(m.log_time, i as u64);
    }
}

#[test]
fn summary_force_scan_matches_indexed_summary() {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new().create(Cursor::new(&mut buf)).unwrap();
        let chan = channel("/topic");
        writer.add_channel(&chan).unwrap();
        for i in 0..5u64 {
            writer
                .write(&Message {
                    channel: chan.clone(),
                    sequence: i as u32,
                    log_time: i,
                    publish_time: i,
                    data: Cow::Borrowed(b"x"),
                })
                .unwrap();
        }
        writer.finish().unwrap();
    }

    let indexed = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
    let scanned = IndexedReader::open(&buf, SummaryReadMethod::ForceScan).unwrap();

    assert_eq!(indexed.channels().len(), scanned.channels().len());
    assert_eq!(
        indexed
            .read_messages(0, u64::MAX, ReadOrder::FileOrder, None, |_| {})
            .unwrap()
            .len(),
        scanned
            .read_messages(0, u64::MAX, ReadOrder::FileOrder, None, |_| {})
            .unwrap()
            .len()
    );
}

#[test]
fn channels_and_schemas_with_no_messages_are_still_preserved() {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new().create(Cursor::new(&mut buf)).unwrap();
        let chan = channel("/unused");
        writer.add_channel(&chan).unwrap();
        writer.finish().unwrap();
    }

    let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
    assert_eq!(reader.channels().len(), 1);
    assert_eq!(reader.schemas().len(), 1);
    assert_eq!(reader.statistics().unwrap().message_count, 0);
}

#[test]
fn topics_filter_restricts_read_messages() {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new().create(Cursor::new(&mut buf)).unwrap();
        let a = channel("/a");
        let b = channel("/b");
        writer.add_channel(&a).unwrap();
        writer.add_channel(&b).unwrap();
        for (chan, log_time) in [(a.clone(), 0u64), (b.clone(), 1), (a, 2)] {
            writer
                .write(&Message {
                    channel: chan,
                    sequence: 0,
                    log_time,
                    publish_time: log_time,
                    data: Cow::Borrowed(b"x"),
                })
                .unwrap();
        }
        writer.finish().unwrap();
    }

    let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
    let topics = vec!["/b".to_string()];
    let messages = reader
        .read_messages(0, u64::MAX, ReadOrder::LogTimeOrder, Some(&topics), |_| {})
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].channel.topic, "/b");
}

#[test]
fn metadata_round_trips() {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new().create(Cursor::new(&mut buf)).unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("k".to_string(), "v".to_string());
        writer.write_metadata("run_info", fields).unwrap();
        writer.finish().unwrap();
    }

    let reader = IndexedReader::open(&buf, SummaryReadMethod::NoFallbackScan).unwrap();
    let indexes: Vec<_> = reader
        .chunk_indexes()
        .iter()
        .collect();
    assert!(indexes.is_empty());

    let summary = mcap::read::Summary::read(&buf).unwrap().unwrap();
    assert_eq!(summary.metadata_indexes.len(), 1);
    let metadata = mcap::read::metadata(&buf, &summary.metadata_indexes[0]).unwrap();
    assert_eq!(metadata.name, "run_info");
    assert_eq!(metadata.metadata.get("k").unwrap(), "v");
}

#[test]
fn attachments_round_trip_with_crc() {
    let mut buf = Vec::new();
    {
        let mut writer = WriteOptions::new().create(Cursor::new(&mut buf)).unwrap();
        writer
            .attach(&mcap::Attachment {
                log_time: 1,
                create_time: 1,
                name: "thumbnail.png".into(),
                media_type: "image/png".into(),
                data: Cow::Borrowed(b"\x89PNG..."),
            })
            .unwrap();
        writer.finish().unwrap();
    }

    let summary = mcap::read::Summary::read(&buf).unwrap().unwrap();
    assert_eq!(summary.attachment_indexes.len(), 1);
    let attachment = mcap::read::attachment(&buf, &summary.attachment_indexes[0]).unwrap();
    assert_eq!(attachment.name, "thumbnail.png");
    assert_eq!(attachment.data.as_ref(), b"\x89PNG...");
}
