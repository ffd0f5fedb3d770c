//! Streams section: object-local stream IDs to label sets.
//!
//! Opening a Streams section decodes it in one linear pass and builds an
//! immutable `StreamId -> Stream` lookup. The handle is read-only afterwards
//! and can be shared by concurrent readers; a changed section requires
//! reopening.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef, Int64Array, StringArray, TimestampNanosecondArray},
    datatypes::{DataType, Field, Schema},
};
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    context::QueryContext,
    dataobj::{
        RawSection, SectionKind,
        error::{ContextSnafu, DataObjResult, DuplicateStreamIdSnafu, WrongSectionKindSnafu},
        parquet_io::{build_batch, encode_batch, read_all, tagged_utf8_field, timestamp_type},
        sections::{
            LABEL_PREFIX, MAX_TIMESTAMP, MIN_TIMESTAMP, STREAM_ID, i64_column, required_i64,
            timestamp_column, timestamp_from_nanos, timestamp_to_nanos, utf8_column,
        },
    },
    labels::Labels,
};

const UNCOMPRESSED_SIZE: &str = "uncompressed_size";
const ROWS: &str = "rows";

/// Object-local stream identifier, assigned from 1 at build time.
pub type StreamId = i64;

/// A unique label set within one data object, with its statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stream {
    /// Object-local identifier.
    pub id: StreamId,
    /// Label set identifying the stream.
    pub labels: Labels,
    /// Earliest record timestamp (inclusive).
    pub min_timestamp: DateTime<Utc>,
    /// Latest record timestamp (inclusive).
    pub max_timestamp: DateTime<Utc>,
    /// Sum of uncompressed line and metadata bytes.
    pub uncompressed_size: u64,
    /// Number of log records.
    pub rows: u64,
}

impl Stream {
    /// Whether `[min_timestamp, max_timestamp]` intersects `[start, end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.min_timestamp <= end && self.max_timestamp >= start
    }
}

/// Opened Streams section.
#[derive(Clone, Debug)]
pub struct StreamsSection {
    ordinal: u32,
    streams: Arc<BTreeMap<StreamId, Stream>>,
    label_names: Arc<BTreeSet<String>>,
}

impl StreamsSection {
    /// Whether `raw` is a Streams section.
    pub fn check_section(raw: &RawSection) -> bool {
        raw.kind() == SectionKind::Streams
    }

    /// Decode `raw` and build the stream lookup.
    pub fn open(ctx: &QueryContext, raw: &RawSection) -> DataObjResult<Self> {
        ensure!(
            Self::check_section(raw),
            WrongSectionKindSnafu {
                expected: SectionKind::Streams,
                actual: raw.kind(),
            }
        );
        ctx.check().context(ContextSnafu)?;

        let kind = SectionKind::Streams;
        let batches = read_all(kind, raw.data())?;

        let mut streams = BTreeMap::new();
        let mut label_names = BTreeSet::new();
        for batch in &batches {
            let ids = i64_column(kind, batch, STREAM_ID)?;
            let mins = timestamp_column(kind, batch, MIN_TIMESTAMP)?;
            let maxs = timestamp_column(kind, batch, MAX_TIMESTAMP)?;
            let sizes = i64_column(kind, batch, UNCOMPRESSED_SIZE)?;
            let rows = i64_column(kind, batch, ROWS)?;

            let schema = batch.schema();
            let mut label_columns = Vec::new();
            for field in schema.fields() {
                if let Some(label) = field.name().strip_prefix(LABEL_PREFIX) {
                    let values = utf8_column(kind, batch, field.name())?;
                    label_columns.push((label.to_string(), values));
                    label_names.insert(label.to_string());
                }
            }

            for row in 0..batch.num_rows() {
                let id = required_i64(kind, ids, STREAM_ID, row)?;
                let mut labels = Labels::new();
                for (name, values) in &label_columns {
                    if values.is_valid(row) {
                        labels.insert(name.clone(), values.value(row));
                    }
                }
                let min = required_i64(kind, mins, MIN_TIMESTAMP, row)?;
                let max = required_i64(kind, maxs, MAX_TIMESTAMP, row)?;
                let size = required_i64(kind, sizes, UNCOMPRESSED_SIZE, row)?;
                let count = required_i64(kind, rows, ROWS, row)?;
                let stream = Stream {
                    id,
                    labels,
                    min_timestamp: timestamp_from_nanos(min),
                    max_timestamp: timestamp_from_nanos(max),
                    uncompressed_size: size.max(0) as u64,
                    rows: count.max(0) as u64,
                };
                ensure!(
                    streams.insert(id, stream).is_none(),
                    DuplicateStreamIdSnafu { stream_id: id }
                );
            }
        }

        Ok(Self {
            ordinal: raw.ordinal(),
            streams: Arc::new(streams),
            label_names: Arc::new(label_names),
        })
    }

    /// One-based ordinal of this section among the object's Streams sections.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Look up a stream.
    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    /// All streams in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    /// Every label name used by any stream of this section, sorted.
    pub fn label_names(&self) -> &BTreeSet<String> {
        &self.label_names
    }

    /// Number of streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// True when the section holds no streams.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Encode `streams` as a Streams section payload.
    pub(crate) fn encode(streams: &[Stream]) -> DataObjResult<Vec<u8>> {
        let kind = SectionKind::Streams;
        let names: BTreeSet<&str> = streams.iter().flat_map(|s| s.labels.names()).collect();

        let mut fields = vec![
            Field::new(STREAM_ID, DataType::Int64, false),
            Field::new(MIN_TIMESTAMP, timestamp_type(), false),
            Field::new(MAX_TIMESTAMP, timestamp_type(), false),
            Field::new(UNCOMPRESSED_SIZE, DataType::Int64, false),
            Field::new(ROWS, DataType::Int64, false),
        ];
        let mut mins = Vec::with_capacity(streams.len());
        let mut maxs = Vec::with_capacity(streams.len());
        for s in streams {
            mins.push(timestamp_to_nanos(s.min_timestamp)?);
            maxs.push(timestamp_to_nanos(s.max_timestamp)?);
        }
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(streams.iter().map(|s| s.id))),
            Arc::new(TimestampNanosecondArray::from(mins).with_timezone("UTC")),
            Arc::new(TimestampNanosecondArray::from(maxs).with_timezone("UTC")),
            Arc::new(Int64Array::from_iter_values(
                streams.iter().map(|s| s.uncompressed_size as i64),
            )),
            Arc::new(Int64Array::from_iter_values(streams.iter().map(|s| s.rows as i64))),
        ];
        for name in names {
            fields.push(tagged_utf8_field(&format!("{LABEL_PREFIX}{name}"), "label"));
            columns.push(Arc::new(StringArray::from_iter(
                streams.iter().map(|s| s.labels.get(name)),
            )));
        }

        let batch = build_batch(kind, Arc::new(Schema::new(fields)), columns)?;
        encode_batch(kind, &batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataobj::{DataObjError, DataObject, ObjectEncoder},
        test_util::{ctx, ts},
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn stream(id: StreamId, labels: &[(&str, &str)], min: i64, max: i64) -> Stream {
        Stream {
            id,
            labels: Labels::from_pairs(labels.iter().copied()),
            min_timestamp: ts(min),
            max_timestamp: ts(max),
            uncompressed_size: 10 * id as u64,
            rows: id as u64,
        }
    }

    fn object_with(streams: &[Stream]) -> Result<DataObject, DataObjError> {
        let mut enc = ObjectEncoder::new();
        enc.append(SectionKind::Streams, &StreamsSection::encode(streams)?);
        DataObject::from_bytes(enc.finish()?)
    }

    #[test]
    fn open_builds_lookup() -> TestResult {
        let input = vec![
            stream(1, &[("app", "foo"), ("env", "prod")], 10, 20),
            stream(2, &[("app", "bar"), ("team", "a")], 5, 7),
        ];
        let obj = object_with(&input)?;
        let raw = &obj.sections()[0];
        assert!(StreamsSection::check_section(raw));

        let section = StreamsSection::open(&ctx(), raw)?;
        assert_eq!(section.ordinal(), 1);
        assert_eq!(section.len(), 2);
        assert_eq!(section.get(1), Some(&input[0]));
        assert_eq!(section.get(2), Some(&input[1]));
        assert!(section.get(3).is_none());

        // Absent labels stay absent, not empty strings.
        assert_eq!(section.get(1).and_then(|s| s.labels.get("team")), None);

        let names: Vec<&str> = section.label_names().iter().map(String::as_str).collect();
        assert_eq!(names, ["app", "env", "team"]);
        Ok(())
    }

    #[test]
    fn label_names_do_not_collide_with_fixed_columns() -> TestResult {
        let input = vec![stream(1, &[("rows", "many"), ("stream_id", "x")], 1, 2)];
        let obj = object_with(&input)?;
        let section = StreamsSection::open(&ctx(), &obj.sections()[0])?;

        let s = section.get(1).ok_or("stream 1")?;
        assert_eq!(s.rows, 1);
        assert_eq!(s.labels.get("rows"), Some("many"));
        assert_eq!(s.labels.get("stream_id"), Some("x"));
        Ok(())
    }

    #[test]
    fn overlap_is_inclusive() {
        let s = stream(1, &[], 10, 20);
        assert!(s.overlaps(ts(20), ts(30)));
        assert!(s.overlaps(ts(0), ts(10)));
        assert!(s.overlaps(ts(12), ts(15)));
        assert!(!s.overlaps(ts(21), ts(30)));
        assert!(!s.overlaps(ts(0), ts(9)));
    }

    #[test]
    fn duplicate_ids_are_rejected() -> TestResult {
        let obj = object_with(&[stream(1, &[], 1, 2), stream(1, &[], 3, 4)])?;
        let err = StreamsSection::open(&ctx(), &obj.sections()[0]).expect_err("duplicate");
        assert!(matches!(err, DataObjError::DuplicateStreamId { stream_id: 1 }));
        Ok(())
    }

    #[test]
    fn wrong_kind_and_garbage_are_errors() -> TestResult {
        let mut enc = ObjectEncoder::new();
        enc.append(SectionKind::Logs, b"not parquet");
        enc.append(SectionKind::Streams, b"not parquet either");
        let obj = DataObject::from_bytes(enc.finish()?)?;

        let err = StreamsSection::open(&ctx(), &obj.sections()[0]).expect_err("kind");
        assert!(matches!(err, DataObjError::WrongSectionKind { .. }));

        let err = StreamsSection::open(&ctx(), &obj.sections()[1]).expect_err("garbage");
        assert!(matches!(err, DataObjError::Parquet { .. }));
        Ok(())
    }
}
