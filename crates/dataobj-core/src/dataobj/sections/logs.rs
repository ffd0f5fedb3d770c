//! Logs section: timestamped log records with structured metadata.
//!
//! Records are stored in the writer's order: timestamp descending, then
//! stream ID ascending. Opening a Logs section only loads the Parquet footer;
//! rows are decoded lazily through a projected reader so that unrequested
//! metadata columns (and the message column, when not needed) are never
//! decompressed.

use std::{collections::BTreeSet, sync::Arc};

use arrow::{
    array::{ArrayRef, AsArray, Int64Array, StringArray, TimestampNanosecondArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, ParquetRecordBatchReader};
use snafu::prelude::*;

use crate::{
    context::QueryContext,
    dataobj::{
        RawSection, SectionKind,
        error::{
            ArrowSnafu, BadColumnSnafu, ContextSnafu, DataObjError, DataObjResult,
            WrongSectionKindSnafu,
        },
        parquet_io::{
            build_batch, encode_batch, load_metadata, projected_reader, tagged_utf8_field,
            timestamp_type,
        },
        sections::{
            METADATA_PREFIX, STREAM_ID, StreamId, i64_column, timestamp_column, utf8_column,
        },
    },
    labels::Labels,
};

pub(crate) const TIMESTAMP: &str = "timestamp";
pub(crate) const MESSAGE: &str = "message";

/// A log record as handed to the encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LogRecord {
    pub(crate) stream_id: StreamId,
    pub(crate) timestamp: i64,
    pub(crate) metadata: Labels,
    pub(crate) line: String,
}

/// Columns to decode from a Logs section.
///
/// `stream_id` and `timestamp` are always decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogsColumns {
    /// Structured-metadata keys to decode. Keys absent from the section read
    /// as all-null.
    pub metadata: Vec<String>,
    /// Whether to decode the message column.
    pub message: bool,
}

/// Opened Logs section.
#[derive(Clone, Debug)]
pub struct LogsSection {
    ordinal: u32,
    data: Bytes,
    metadata: ArrowReaderMetadata,
    metadata_keys: Vec<String>,
    rows: u64,
}

impl LogsSection {
    /// Whether `raw` is a Logs section.
    pub fn check_section(raw: &RawSection) -> bool {
        raw.kind() == SectionKind::Logs
    }

    /// Load the section footer and validate its schema.
    pub fn open(ctx: &QueryContext, raw: &RawSection) -> DataObjResult<Self> {
        ensure!(
            Self::check_section(raw),
            WrongSectionKindSnafu {
                expected: SectionKind::Logs,
                actual: raw.kind(),
            }
        );
        ctx.check().context(ContextSnafu)?;

        let kind = SectionKind::Logs;
        let metadata = load_metadata(kind, raw.data())?;
        let schema = metadata.schema().clone();

        expect_type(&schema, STREAM_ID, "Int64", |t| *t == DataType::Int64)?;
        expect_type(&schema, TIMESTAMP, "Timestamp(Nanosecond)", |t| {
            matches!(t, DataType::Timestamp(arrow::datatypes::TimeUnit::Nanosecond, _))
        })?;
        expect_type(&schema, MESSAGE, "Utf8", |t| *t == DataType::Utf8)?;

        let mut metadata_keys = Vec::new();
        for field in schema.fields() {
            if let Some(key) = field.name().strip_prefix(METADATA_PREFIX) {
                ensure!(
                    *field.data_type() == DataType::Utf8,
                    BadColumnSnafu {
                        kind,
                        column: field.name(),
                        expected: "Utf8",
                    }
                );
                metadata_keys.push(key.to_string());
            }
        }
        metadata_keys.sort();

        let rows = metadata.metadata().file_metadata().num_rows().max(0) as u64;
        Ok(Self {
            ordinal: raw.ordinal(),
            data: raw.data().clone(),
            metadata,
            metadata_keys,
            rows,
        })
    }

    /// One-based ordinal of this section among the object's Logs sections.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Structured-metadata keys present in this section, sorted.
    pub fn metadata_keys(&self) -> &[String] {
        &self.metadata_keys
    }

    /// Whether this section has a metadata column named `key`.
    pub fn has_metadata_key(&self, key: &str) -> bool {
        self.metadata_keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok()
    }

    /// Number of records in the section.
    pub fn row_count(&self) -> u64 {
        self.rows
    }

    /// Stream batches of at most `batch_size` records in stored order.
    pub(crate) fn reader(
        &self,
        columns: &LogsColumns,
        batch_size: usize,
    ) -> DataObjResult<LogsReader> {
        let schema = self.metadata.schema();
        let mut roots = Vec::new();
        let mut push_root = |name: &str| {
            if let Ok(idx) = schema.index_of(name) {
                roots.push(idx);
            }
        };
        push_root(STREAM_ID);
        push_root(TIMESTAMP);
        if columns.message {
            push_root(MESSAGE);
        }
        for key in &columns.metadata {
            push_root(&format!("{METADATA_PREFIX}{key}"));
        }
        roots.sort_unstable();
        roots.dedup();

        let inner = projected_reader(
            SectionKind::Logs,
            self.data.clone(),
            self.metadata.clone(),
            roots,
            batch_size.max(1),
        )?;
        Ok(LogsReader {
            inner,
            columns: columns.clone(),
        })
    }

    /// Encode sorted records as a Logs section payload.
    pub(crate) fn encode(records: &[LogRecord]) -> DataObjResult<Vec<u8>> {
        let kind = SectionKind::Logs;
        let keys: BTreeSet<&str> = records.iter().flat_map(|r| r.metadata.names()).collect();

        let mut fields = vec![
            Field::new(STREAM_ID, DataType::Int64, false),
            Field::new(TIMESTAMP, timestamp_type(), false),
        ];
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.stream_id))),
            Arc::new(
                TimestampNanosecondArray::from_iter_values(records.iter().map(|r| r.timestamp))
                    .with_timezone("UTC"),
            ),
        ];
        for key in keys {
            fields.push(tagged_utf8_field(&format!("{METADATA_PREFIX}{key}"), "metadata"));
            columns.push(Arc::new(StringArray::from_iter(
                records.iter().map(|r| r.metadata.get(key)),
            )));
        }
        fields.push(Field::new(MESSAGE, DataType::Utf8, false));
        columns.push(Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.line.as_str()),
        )));

        let batch = build_batch(kind, Arc::new(Schema::new(fields)), columns)?;
        encode_batch(kind, &batch)
    }
}

fn expect_type(
    schema: &Schema,
    column: &str,
    expected: &'static str,
    ok: impl Fn(&DataType) -> bool,
) -> DataObjResult<()> {
    let valid = schema
        .field_with_name(column)
        .map(|f| ok(f.data_type()))
        .unwrap_or(false);
    ensure!(
        valid,
        BadColumnSnafu {
            kind: SectionKind::Logs,
            column,
            expected,
        }
    );
    Ok(())
}

/// Iterator over decoded record batches of a Logs section.
pub(crate) struct LogsReader {
    inner: ParquetRecordBatchReader,
    columns: LogsColumns,
}

impl Iterator for LogsReader {
    type Item = DataObjResult<LogsBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.inner.next()?;
        Some(
            batch
                .context(ArrowSnafu {
                    kind: SectionKind::Logs,
                })
                .and_then(|b| LogsBatch::new(b, &self.columns)),
        )
    }
}

/// Typed view over one decoded batch of log records.
#[derive(Clone, Debug)]
pub(crate) struct LogsBatch {
    stream_ids: Int64Array,
    timestamps: TimestampNanosecondArray,
    message: Option<StringArray>,
    // One entry per requested key; `None` when the section lacks the key.
    metadata: Vec<Option<StringArray>>,
}

impl LogsBatch {
    fn new(batch: RecordBatch, columns: &LogsColumns) -> Result<Self, DataObjError> {
        let kind = SectionKind::Logs;
        let stream_ids = i64_column(kind, &batch, STREAM_ID)?.clone();
        let timestamps = timestamp_column(kind, &batch, TIMESTAMP)?.clone();
        let message = if columns.message {
            Some(utf8_column(kind, &batch, MESSAGE)?.clone())
        } else {
            None
        };
        let metadata = columns
            .metadata
            .iter()
            .map(|key| {
                batch
                    .column_by_name(&format!("{METADATA_PREFIX}{key}"))
                    .and_then(|c| c.as_string_opt::<i32>())
                    .cloned()
            })
            .collect();
        Ok(Self {
            stream_ids,
            timestamps,
            message,
            metadata,
        })
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.stream_ids.len()
    }

    pub(crate) fn stream_ids(&self) -> &Int64Array {
        &self.stream_ids
    }

    pub(crate) fn timestamps(&self) -> &TimestampNanosecondArray {
        &self.timestamps
    }

    pub(crate) fn message(&self) -> Option<&StringArray> {
        self.message.as_ref()
    }

    /// Column for the `i`-th requested metadata key.
    pub(crate) fn metadata(&self, i: usize) -> Option<&StringArray> {
        self.metadata.get(i).and_then(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    use crate::{
        dataobj::{DataObject, ObjectEncoder},
        test_util::ctx,
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn record(stream_id: StreamId, timestamp: i64, meta: &[(&str, &str)], line: &str) -> LogRecord {
        LogRecord {
            stream_id,
            timestamp,
            metadata: Labels::from_pairs(meta.iter().copied()),
            line: line.to_string(),
        }
    }

    fn open(records: &[LogRecord]) -> Result<LogsSection, Box<dyn std::error::Error>> {
        let mut enc = ObjectEncoder::new();
        enc.append(SectionKind::Logs, &LogsSection::encode(records)?);
        let obj = DataObject::from_bytes(enc.finish()?)?;
        Ok(LogsSection::open(&ctx(), &obj.sections()[0])?)
    }

    fn sample() -> Vec<LogRecord> {
        vec![
            record(1, 30, &[("pod", "p1")], "c"),
            record(2, 20, &[("trace", "t")], "b"),
            record(1, 10, &[], "a"),
        ]
    }

    #[test]
    fn open_reports_keys_and_rows() -> TestResult {
        let section = open(&sample())?;
        assert_eq!(section.ordinal(), 1);
        assert_eq!(section.row_count(), 3);
        assert_eq!(section.metadata_keys(), ["pod".to_string(), "trace".to_string()]);
        assert!(section.has_metadata_key("pod"));
        assert!(!section.has_metadata_key("env"));
        Ok(())
    }

    #[test]
    fn projected_read_preserves_order_and_nulls() -> TestResult {
        let section = open(&sample())?;
        let columns = LogsColumns {
            metadata: vec!["pod".into(), "absent".into()],
            message: true,
        };
        let batches: Vec<LogsBatch> = section.reader(&columns, 2)?.collect::<Result<_, _>>()?;
        assert_eq!(batches.iter().map(LogsBatch::num_rows).collect::<Vec<_>>(), [2, 1]);

        let first = &batches[0];
        assert_eq!(first.stream_ids().values().to_vec(), vec![1, 2]);
        assert_eq!(first.timestamps().values().to_vec(), vec![30, 20]);
        let pod = first.metadata(0).ok_or("pod column")?;
        assert_eq!(pod.value(0), "p1");
        assert!(pod.is_null(1));
        assert!(first.metadata(1).is_none());
        assert_eq!(first.message().map(|m| m.value(1)), Some("b"));
        Ok(())
    }

    #[test]
    fn message_is_skipped_unless_requested() -> TestResult {
        let section = open(&sample())?;
        let batches: Vec<LogsBatch> = section
            .reader(&LogsColumns::default(), 16)?
            .collect::<Result<_, _>>()?;
        assert_eq!(batches.len(), 1);
        assert!(batches[0].message().is_none());
        Ok(())
    }
}
