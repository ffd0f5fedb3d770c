//! Writer-side builder for log data objects.
//!
//! [`LogsObjectBuilder`] accumulates log streams and encodes them into a data
//! object:
//!
//! - Identical label sets merge into one stream; stream IDs are assigned
//!   from 1 in first-seen order at flush time.
//! - Streams are grouped into Streams sections of at most
//!   `max_section_streams` streams. Each group is followed by the Logs
//!   sections holding its records, at most `max_section_rows` each.
//! - Records within a Logs section are sorted by timestamp descending, then
//!   stream ID ascending.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;
use snafu::prelude::*;

use crate::{
    config::BuilderConfig,
    dataobj::{
        ObjectEncoder, SectionKind,
        error::{ConfigSnafu, DataObjResult, EmptyBuilderSnafu},
        sections::{LogRecord, LogsSection, Stream, StreamsSection, timestamp_to_nanos},
    },
    labels::Labels,
};

/// A single log line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Record timestamp.
    pub timestamp: DateTime<Utc>,
    /// Log line.
    pub line: String,
    /// Structured metadata; names may collide with stream labels.
    pub metadata: Labels,
}

impl LogEntry {
    /// Entry without structured metadata.
    pub fn new(timestamp: DateTime<Utc>, line: impl Into<String>) -> Self {
        Self {
            timestamp,
            line: line.into(),
            metadata: Labels::new(),
        }
    }

    /// Attach structured metadata.
    pub fn with_metadata(mut self, metadata: Labels) -> Self {
        self.metadata = metadata;
        self
    }

    fn uncompressed_size(&self) -> u64 {
        let meta: usize = self.metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.line.len() + meta) as u64
    }
}

/// Entries pushed for one label set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogStream {
    /// Stream labels.
    pub labels: Labels,
    /// Entries in any order.
    pub entries: Vec<LogEntry>,
}

/// Summary of a flushed object, used to register it with the metastore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushStats {
    /// Earliest record timestamp.
    pub min_timestamp: DateTime<Utc>,
    /// Latest record timestamp.
    pub max_timestamp: DateTime<Utc>,
    /// Number of streams written.
    pub streams: usize,
    /// Number of records written.
    pub rows: usize,
    /// Number of Logs sections written.
    pub logs_sections: usize,
}

/// Accumulates streams and encodes them into one data object.
#[derive(Debug)]
pub struct LogsObjectBuilder {
    config: BuilderConfig,
    streams: Vec<(Labels, Vec<LogEntry>)>,
    by_labels: HashMap<Labels, usize>,
}

impl LogsObjectBuilder {
    /// Create a builder after validating `config`.
    pub fn new(config: BuilderConfig) -> DataObjResult<Self> {
        config.validate().context(ConfigSnafu)?;
        Ok(Self {
            config,
            streams: Vec::new(),
            by_labels: HashMap::new(),
        })
    }

    /// Add entries for a stream, merging with an earlier identical label set.
    pub fn append(&mut self, stream: LogStream) {
        match self.by_labels.get(&stream.labels) {
            Some(&idx) => self.streams[idx].1.extend(stream.entries),
            None => {
                self.by_labels.insert(stream.labels.clone(), self.streams.len());
                self.streams.push((stream.labels, stream.entries));
            }
        }
    }

    /// Number of buffered entries.
    pub fn rows(&self) -> usize {
        self.streams.iter().map(|(_, e)| e.len()).sum()
    }

    /// Encode buffered streams into a data object and reset the builder.
    pub fn flush(&mut self) -> DataObjResult<(Bytes, FlushStats)> {
        let pending: Vec<(Labels, Vec<LogEntry>)> = std::mem::take(&mut self.streams)
            .into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .collect();
        self.by_labels.clear();
        ensure!(!pending.is_empty(), EmptyBuilderSnafu);

        let mut streams = Vec::with_capacity(pending.len());
        let mut records = Vec::new();
        for (idx, (labels, entries)) in pending.into_iter().enumerate() {
            let id = idx as i64 + 1;
            let mut stream = Stream {
                id,
                labels,
                min_timestamp: DateTime::<Utc>::MAX_UTC,
                max_timestamp: DateTime::<Utc>::MIN_UTC,
                uncompressed_size: 0,
                rows: entries.len() as u64,
            };
            let mut stream_records = Vec::with_capacity(entries.len());
            for entry in entries {
                stream.min_timestamp = stream.min_timestamp.min(entry.timestamp);
                stream.max_timestamp = stream.max_timestamp.max(entry.timestamp);
                stream.uncompressed_size += entry.uncompressed_size();
                stream_records.push(LogRecord {
                    stream_id: id,
                    timestamp: timestamp_to_nanos(entry.timestamp)?,
                    metadata: entry.metadata,
                    line: entry.line,
                });
            }
            streams.push(stream);
            records.push(stream_records);
        }

        let stats = FlushStats {
            min_timestamp: streams
                .iter()
                .map(|s| s.min_timestamp)
                .min()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            max_timestamp: streams
                .iter()
                .map(|s| s.max_timestamp)
                .max()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            streams: streams.len(),
            rows: records.iter().map(Vec::len).sum(),
            logs_sections: 0,
        };

        let mut encoder = ObjectEncoder::new();
        let mut logs_sections = 0;
        let group = self.config.max_section_streams;
        for (stream_group, record_group) in streams.chunks(group).zip(records.chunks(group)) {
            encoder.append(SectionKind::Streams, &StreamsSection::encode(stream_group)?);

            let mut sorted: Vec<LogRecord> = record_group.iter().flatten().cloned().collect();
            sorted.sort_by(|a, b| {
                b.timestamp
                    .cmp(&a.timestamp)
                    .then(a.stream_id.cmp(&b.stream_id))
            });
            for chunk in sorted.chunks(self.config.max_section_rows) {
                encoder.append(SectionKind::Logs, &LogsSection::encode(chunk)?);
                logs_sections += 1;
            }
        }
        let bytes = encoder.finish()?;

        debug!(
            "flushed data object: {} streams, {} rows, {} logs sections, {} bytes",
            stats.streams,
            stats.rows,
            logs_sections,
            bytes.len()
        );
        Ok((
            bytes,
            FlushStats {
                logs_sections,
                ..stats
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataobj::{DataObjError, DataObject, LogsColumns},
        test_util::{ctx, ts},
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn stream(labels: &[(&str, &str)], entries: &[(i64, &str)]) -> LogStream {
        LogStream {
            labels: Labels::from_pairs(labels.iter().copied()),
            entries: entries
                .iter()
                .map(|(secs, line)| LogEntry::new(ts(*secs), *line))
                .collect(),
        }
    }

    #[test]
    fn assigns_ids_in_first_seen_order_and_merges() -> TestResult {
        let mut builder = LogsObjectBuilder::new(BuilderConfig::default())?;
        builder.append(stream(&[("app", "b")], &[(5, "x")]));
        builder.append(stream(&[("app", "a")], &[(7, "y")]));
        builder.append(stream(&[("app", "b")], &[(9, "z")]));
        assert_eq!(builder.rows(), 3);

        let (bytes, stats) = builder.flush()?;
        assert_eq!(stats.streams, 2);
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.min_timestamp, ts(5));
        assert_eq!(stats.max_timestamp, ts(9));
        assert_eq!(stats.logs_sections, 1);

        let obj = DataObject::from_bytes(bytes)?;
        let streams = StreamsSection::open(&ctx(), &obj.sections()[0])?;
        let b = streams.get(1).ok_or("stream 1")?;
        assert_eq!(b.labels.get("app"), Some("b"));
        assert_eq!((b.min_timestamp, b.max_timestamp, b.rows), (ts(5), ts(9), 2));
        assert_eq!(streams.get(2).and_then(|s| s.labels.get("app")), Some("a"));
        Ok(())
    }

    #[test]
    fn records_sorted_newest_first() -> TestResult {
        let mut builder = LogsObjectBuilder::new(BuilderConfig::default())?;
        builder.append(stream(&[("app", "a")], &[(1, "a1"), (3, "a3")]));
        builder.append(stream(&[("app", "b")], &[(3, "b3"), (2, "b2")]));

        let (bytes, _) = builder.flush()?;
        let obj = DataObject::from_bytes(bytes)?;
        let logs = obj.section(SectionKind::Logs, 1).ok_or("logs 1")?;
        let logs = LogsSection::open(&ctx(), logs)?;
        let columns = LogsColumns {
            metadata: vec![],
            message: true,
        };
        let mut lines = Vec::new();
        for batch in logs.reader(&columns, 100)? {
            let batch = batch?;
            let messages = batch.message().ok_or("message column")?;
            for i in 0..batch.num_rows() {
                lines.push(messages.value(i).to_string());
            }
        }
        assert_eq!(lines, ["a3", "b3", "b2", "a1"]);
        Ok(())
    }

    #[test]
    fn splits_sections_by_thresholds() -> TestResult {
        let config = BuilderConfig {
            max_section_rows: 2,
            max_section_streams: 2,
        };
        let mut builder = LogsObjectBuilder::new(config)?;
        builder.append(stream(&[("s", "1")], &[(1, "a"), (2, "b"), (3, "c")]));
        builder.append(stream(&[("s", "2")], &[(4, "d")]));
        builder.append(stream(&[("s", "3")], &[(5, "e")]));

        let (bytes, stats) = builder.flush()?;
        let obj = DataObject::from_bytes(bytes)?;
        let kinds: Vec<SectionKind> = obj.sections().iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            [
                SectionKind::Streams,
                SectionKind::Logs,
                SectionKind::Logs,
                SectionKind::Streams,
                SectionKind::Logs,
            ]
        );
        assert_eq!(stats.logs_sections, 3);

        // Stream IDs stay unique across Streams sections.
        let second = StreamsSection::open(&ctx(), &obj.sections()[3])?;
        assert_eq!(second.iter().map(|s| s.id).collect::<Vec<_>>(), [3]);
        Ok(())
    }

    #[test]
    fn empty_flush_is_an_error() -> TestResult {
        let mut builder = LogsObjectBuilder::new(BuilderConfig::default())?;
        builder.append(stream(&[("app", "a")], &[]));
        let err = builder.flush().expect_err("empty");
        assert!(matches!(err, DataObjError::EmptyBuilder));
        Ok(())
    }

    #[test]
    fn flush_resets_the_builder() -> TestResult {
        let mut builder = LogsObjectBuilder::new(BuilderConfig::default())?;
        builder.append(stream(&[("app", "a")], &[(1, "x")]));
        builder.flush()?;
        assert_eq!(builder.rows(), 0);
        assert!(builder.flush().is_err());
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = BuilderConfig {
            max_section_rows: 0,
            max_section_streams: 1,
        };
        assert!(matches!(
            LogsObjectBuilder::new(config),
            Err(DataObjError::Config { .. })
        ));
    }
}
