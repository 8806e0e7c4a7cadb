// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record types accepted by the output and their msgpack wire form.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key the timestamp is stored under in the encoded record.
pub const TIME_KEY: &str = "time";

/// A single structured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: i64,
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(timestamp: i64, fields: BTreeMap<String, Value>) -> Self {
        Self { timestamp, fields }
    }
}

/// A tagged batch of records, submitted and routed as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    pub tag: String,
    pub records: Vec<Record>,
}

impl RecordSet {
    pub fn new(tag: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            tag: tag.into(),
            records,
        }
    }
}

// Flat map: `time` first, then every field at the top level. A field named
// `time` replaces the record timestamp.
struct WireRecord<'a>(&'a Record);

impl Serialize for WireRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = self.0;
        let overrides_time = record.fields.contains_key(TIME_KEY);
        let len = record.fields.len() + usize::from(!overrides_time);
        let mut map = serializer.serialize_map(Some(len))?;
        if !overrides_time {
            map.serialize_entry(TIME_KEY, &record.timestamp)?;
        }
        for (key, value) in &record.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Appends the msgpack encoding of every record to `buf`, one map per record.
pub fn encode_records(buf: &mut Vec<u8>, records: &[Record]) -> Result<(), rmp_serde::encode::Error> {
    for record in records {
        WireRecord(record).serialize(&mut rmp_serde::Serializer::new(&mut *buf))?;
    }
    Ok(())
}

/// Decodes a stream of concatenated msgpack maps, as produced by [`encode_records`].
pub fn decode_records(data: &[u8]) -> Result<Vec<Value>, rmp_serde::decode::Error> {
    let mut cursor = std::io::Cursor::new(data);
    let mut values = Vec::new();
    while (cursor.position() as usize) < data.len() {
        let value: Value = rmp_serde::from_read(&mut cursor)?;
        values.push(value);
    }
    Ok(values)
}
