//! Typed section handles and shared column helpers.
//!
//! Each section kind exposes `check_section` (a cheap discriminator over a
//! [`RawSection`](crate::dataobj::RawSection)) and `open(ctx, raw)`, which
//! validates the payload and returns a read-only handle that can be shared
//! between concurrent readers.

use arrow::{
    array::{
        Array, AsArray, Int64Array, PrimitiveArray, StringArray, TimestampNanosecondArray,
    },
    datatypes::{ArrowPrimitiveType, Int64Type, TimestampNanosecondType},
    record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::dataobj::{
    SectionKind,
    error::{BadColumnSnafu, DataObjResult, TimestampRangeSnafu, UnexpectedNullSnafu},
};

mod index;
mod logs;
mod streams;

pub use index::{IndexEntry, IndexSection};
pub(crate) use logs::{LogRecord, LogsBatch, MESSAGE, TIMESTAMP};
pub use logs::{LogsColumns, LogsSection};
pub use streams::{Stream, StreamId, StreamsSection};

pub(crate) const STREAM_ID: &str = "stream_id";
pub(crate) const MIN_TIMESTAMP: &str = "min_timestamp";
pub(crate) const MAX_TIMESTAMP: &str = "max_timestamp";

/// Column-name prefix for label columns in a Streams section.
pub(crate) const LABEL_PREFIX: &str = "label.";
/// Column-name prefix for structured-metadata columns in a Logs section.
pub(crate) const METADATA_PREFIX: &str = "metadata.";

/// Nanoseconds since the Unix epoch.
pub(crate) fn timestamp_to_nanos(ts: DateTime<Utc>) -> DataObjResult<i64> {
    ts.timestamp_nanos_opt().context(TimestampRangeSnafu {
        timestamp: ts.to_rfc3339(),
    })
}

pub(crate) fn timestamp_from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

pub(crate) fn i64_column<'a>(
    kind: SectionKind,
    batch: &'a RecordBatch,
    name: &str,
) -> DataObjResult<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_primitive_opt::<Int64Type>())
        .context(BadColumnSnafu {
            kind,
            column: name,
            expected: "Int64",
        })
}

pub(crate) fn timestamp_column<'a>(
    kind: SectionKind,
    batch: &'a RecordBatch,
    name: &str,
) -> DataObjResult<&'a TimestampNanosecondArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_primitive_opt::<TimestampNanosecondType>())
        .context(BadColumnSnafu {
            kind,
            column: name,
            expected: "Timestamp(Nanosecond)",
        })
}

pub(crate) fn utf8_column<'a>(
    kind: SectionKind,
    batch: &'a RecordBatch,
    name: &str,
) -> DataObjResult<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_string_opt::<i32>())
        .context(BadColumnSnafu {
            kind,
            column: name,
            expected: "Utf8",
        })
}

/// Value at `row` of a required `i64`-backed column, rejecting nulls.
pub(crate) fn required_i64<T>(
    kind: SectionKind,
    array: &PrimitiveArray<T>,
    column: &str,
    row: usize,
) -> DataObjResult<i64>
where
    T: ArrowPrimitiveType<Native = i64>,
{
    ensure!(
        array.is_valid(row),
        UnexpectedNullSnafu { kind, column, row }
    );
    Ok(array.value(row))
}
