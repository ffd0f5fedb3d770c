//! Parquet encoding and projected decoding of section payloads.

use std::sync::Arc;

use arrow::{
    datatypes::{DataType, Field, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::{
    arrow::{
        ArrowWriter, ProjectionMask,
        arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReader,
            ParquetRecordBatchReaderBuilder},
    },
    basic::Compression,
    file::properties::WriterProperties,
};
use snafu::prelude::*;

use crate::dataobj::{
    COLUMN_ROLE_KEY, SectionKind,
    error::{ArrowSnafu, DataObjResult, ParquetSnafu},
};

/// Arrow type used for every timestamp column.
pub(crate) fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, Some(Arc::from("UTC")))
}

/// A nullable `Utf8` field tagged with its column role.
pub(crate) fn tagged_utf8_field(name: &str, role: &str) -> Field {
    Field::new(name, DataType::Utf8, true).with_metadata(
        [(COLUMN_ROLE_KEY.to_string(), role.to_string())]
            .into_iter()
            .collect(),
    )
}

/// Encode one record batch as a standalone Parquet file.
pub(crate) fn encode_batch(kind: SectionKind, batch: &RecordBatch) -> DataObjResult<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))
        .context(ParquetSnafu { kind })?;
    writer.write(batch).context(ParquetSnafu { kind })?;
    writer.close().context(ParquetSnafu { kind })?;
    Ok(buf)
}

/// Build a record batch, attributing failures to `kind`.
pub(crate) fn build_batch(
    kind: SectionKind,
    schema: SchemaRef,
    columns: Vec<arrow::array::ArrayRef>,
) -> DataObjResult<RecordBatch> {
    RecordBatch::try_new(schema, columns).context(ArrowSnafu { kind })
}

/// Load the Parquet footer and embedded Arrow schema of a section.
pub(crate) fn load_metadata(kind: SectionKind, data: &Bytes) -> DataObjResult<ArrowReaderMetadata> {
    ArrowReaderMetadata::load(data, ArrowReaderOptions::default()).context(ParquetSnafu { kind })
}

/// Open a batch reader over the given top-level columns.
pub(crate) fn projected_reader(
    kind: SectionKind,
    data: Bytes,
    metadata: ArrowReaderMetadata,
    roots: Vec<usize>,
    batch_size: usize,
) -> DataObjResult<ParquetRecordBatchReader> {
    let mask = ProjectionMask::roots(metadata.parquet_schema(), roots);
    ParquetRecordBatchReaderBuilder::new_with_metadata(data, metadata)
        .with_projection(mask)
        .with_batch_size(batch_size)
        .build()
        .context(ParquetSnafu { kind })
}

/// Decode every row of a section into memory.
pub(crate) fn read_all(kind: SectionKind, data: &Bytes) -> DataObjResult<Vec<RecordBatch>> {
    let metadata = load_metadata(kind, data)?;
    let roots = (0..metadata.schema().fields().len()).collect();
    let reader = projected_reader(kind, data.clone(), metadata, roots, 8192)?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu { kind })
}
