//! Index section: metastore entries pointing at committed data objects.

use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, StringArray, TimestampNanosecondArray},
    datatypes::{DataType, Field, Schema},
};
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    context::QueryContext,
    dataobj::{
        RawSection, SectionKind,
        error::{ContextSnafu, DataObjResult, UnexpectedNullSnafu, WrongSectionKindSnafu},
        parquet_io::{build_batch, encode_batch, read_all, timestamp_type},
        sections::{
            MAX_TIMESTAMP, MIN_TIMESTAMP, required_i64, timestamp_column, timestamp_from_nanos,
            timestamp_to_nanos, utf8_column,
        },
    },
};

const PATH: &str = "path";

/// One committed data object as recorded in the metastore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// Object path relative to the store root.
    pub path: String,
    /// Earliest timestamp of any stream in the object.
    pub min_timestamp: DateTime<Utc>,
    /// Latest timestamp of any stream in the object.
    pub max_timestamp: DateTime<Utc>,
}

impl IndexEntry {
    /// Whether the entry's span intersects `[start, end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.min_timestamp <= end && self.max_timestamp >= start
    }
}

/// Opened Index section.
#[derive(Clone, Debug)]
pub struct IndexSection {
    entries: Vec<IndexEntry>,
}

impl IndexSection {
    /// Whether `raw` is an Index section.
    pub fn check_section(raw: &RawSection) -> bool {
        raw.kind() == SectionKind::Index
    }

    /// Decode every entry of `raw`.
    pub fn open(ctx: &QueryContext, raw: &RawSection) -> DataObjResult<Self> {
        ensure!(
            Self::check_section(raw),
            WrongSectionKindSnafu {
                expected: SectionKind::Index,
                actual: raw.kind(),
            }
        );
        ctx.check().context(ContextSnafu)?;

        let kind = SectionKind::Index;
        let mut entries = Vec::new();
        for batch in read_all(kind, raw.data())? {
            let paths = utf8_column(kind, &batch, PATH)?;
            let mins = timestamp_column(kind, &batch, MIN_TIMESTAMP)?;
            let maxs = timestamp_column(kind, &batch, MAX_TIMESTAMP)?;
            for row in 0..batch.num_rows() {
                ensure!(
                    paths.is_valid(row),
                    UnexpectedNullSnafu {
                        kind,
                        column: PATH,
                        row
                    }
                );
                let min = required_i64(kind, mins, MIN_TIMESTAMP, row)?;
                let max = required_i64(kind, maxs, MAX_TIMESTAMP, row)?;
                entries.push(IndexEntry {
                    path: paths.value(row).to_string(),
                    min_timestamp: timestamp_from_nanos(min),
                    max_timestamp: timestamp_from_nanos(max),
                });
            }
        }
        Ok(Self { entries })
    }

    /// Entries in stored order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Consume the handle, returning its entries.
    pub fn into_entries(self) -> Vec<IndexEntry> {
        self.entries
    }

    /// Encode `entries` as an Index section payload.
    pub(crate) fn encode(entries: &[IndexEntry]) -> DataObjResult<Vec<u8>> {
        let kind = SectionKind::Index;
        let mut mins = Vec::with_capacity(entries.len());
        let mut maxs = Vec::with_capacity(entries.len());
        for e in entries {
            mins.push(timestamp_to_nanos(e.min_timestamp)?);
            maxs.push(timestamp_to_nanos(e.max_timestamp)?);
        }

        let schema = Schema::new(vec![
            Field::new(PATH, DataType::Utf8, false),
            Field::new(MIN_TIMESTAMP, timestamp_type(), false),
            Field::new(MAX_TIMESTAMP, timestamp_type(), false),
        ]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.path.as_str()))),
            Arc::new(TimestampNanosecondArray::from(mins).with_timezone("UTC")),
            Arc::new(TimestampNanosecondArray::from(maxs).with_timezone("UTC")),
        ];
        let batch = build_batch(kind, Arc::new(schema), columns)?;
        encode_batch(kind, &batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataobj::{DataObject, ObjectEncoder},
        test_util::{ctx, ts},
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn entries_survive_encoding() -> TestResult {
        let input = vec![
            IndexEntry {
                path: "tenant/t/objects/ab/cdef".into(),
                min_timestamp: ts(100),
                max_timestamp: ts(200),
            },
            IndexEntry {
                path: "tenant/t/objects/01/2345".into(),
                min_timestamp: ts(150),
                max_timestamp: ts(150),
            },
        ];
        let mut enc = ObjectEncoder::new();
        enc.append(SectionKind::Index, &IndexSection::encode(&input)?);
        let obj = DataObject::from_bytes(enc.finish()?)?;

        let section = IndexSection::open(&ctx(), &obj.sections()[0])?;
        assert_eq!(section.entries(), input.as_slice());
        Ok(())
    }

    #[test]
    fn overlap_checks_both_bounds() {
        let e = IndexEntry {
            path: "p".into(),
            min_timestamp: ts(100),
            max_timestamp: ts(200),
        };
        assert!(e.overlaps(ts(200), ts(300)));
        assert!(e.overlaps(ts(0), ts(100)));
        assert!(!e.overlaps(ts(201), ts(300)));
        assert!(!e.overlaps(ts(0), ts(99)));
    }
}
