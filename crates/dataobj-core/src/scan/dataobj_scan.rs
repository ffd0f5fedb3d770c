//! Batch production for a data object scan.

use std::{
    collections::{HashMap, HashSet},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use arrow::{
    array::{Array, ArrayRef, StringBuilder, TimestampNanosecondBuilder},
    datatypes::{Schema, SchemaRef},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use futures::{Stream, StreamExt, stream::BoxStream};
use log::debug;
use snafu::prelude::*;

use crate::{
    context::QueryContext,
    dataobj::{
        DataObjResult, LogsBatch, LogsColumns, LogsSection, MESSAGE, StreamId, StreamsSection,
    },
    scan::{
        column::{ColumnNamespace, ColumnRef, OutputColumn},
        error::{
            ArrowSnafu, ContextSnafu, DataObjectSnafu, InvalidBatchSizeSnafu, ScanError,
            ScanResult,
        },
        resolve::resolve_columns,
    },
};

/// Inputs of [`new_dataobj_scan`].
#[derive(Clone, Debug)]
pub struct DataObjScanOptions {
    /// Streams section describing `logs_section`.
    pub streams_section: StreamsSection,
    /// Logs section to read records from.
    pub logs_section: LogsSection,
    /// Streams whose records are emitted. IDs missing from the Streams
    /// section are ignored.
    pub stream_ids: Vec<StreamId>,
    /// Requested columns; empty selects every column.
    pub projections: Vec<ColumnRef>,
    /// Maximum rows per output batch.
    pub batch_size: usize,
}

/// A lazy, finite sequence of record batches with a fixed schema.
///
/// The sequence ends after the first error.
pub struct DataObjScan {
    schema: SchemaRef,
    inner: BoxStream<'static, ScanResult<RecordBatch>>,
}

impl DataObjScan {
    /// Schema shared by every batch of this scan.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Debug for DataObjScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataObjScan")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Stream for DataObjScan {
    type Item = ScanResult<RecordBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Start a scan of `opts.logs_section` joined with `opts.streams_section`.
///
/// Columns are resolved with [`resolve_columns`] before any row is read.
/// Every emitted batch holds between one and `batch_size` rows. The context
/// is checked before each batch; a cancelled scan ends with a
/// [`ScanError::Context`] item.
pub fn new_dataobj_scan(ctx: &QueryContext, opts: DataObjScanOptions) -> ScanResult<DataObjScan> {
    ensure!(opts.batch_size > 0, InvalidBatchSizeSnafu);
    ctx.check().context(ContextSnafu)?;

    let columns = resolve_columns(
        &opts.projections,
        &opts.streams_section,
        &opts.logs_section,
    );
    let schema = Arc::new(Schema::new(
        columns.iter().map(OutputColumn::field).collect::<Vec<_>>(),
    ));

    let mut label_names = Vec::new();
    let mut logs_columns = LogsColumns::default();
    let sources = columns
        .iter()
        .map(|column| match column.namespace {
            ColumnNamespace::Label => {
                label_names.push(column.name.clone());
                Source::Label(label_names.len() - 1)
            }
            ColumnNamespace::Metadata => {
                logs_columns.metadata.push(column.name.clone());
                Source::Metadata(logs_columns.metadata.len() - 1)
            }
            ColumnNamespace::Builtin if column.name == MESSAGE => {
                logs_columns.message = true;
                Source::Message
            }
            ColumnNamespace::Builtin => Source::Timestamp,
        })
        .collect();

    let wanted: HashSet<StreamId> = opts
        .stream_ids
        .iter()
        .copied()
        .filter(|id| opts.streams_section.get(*id).is_some())
        .collect();
    debug!(
        "scanning logs section {} for {} of {} requested streams into {} columns",
        opts.logs_section.ordinal(),
        wanted.len(),
        opts.stream_ids.len(),
        columns.len()
    );

    let reader = opts
        .logs_section
        .reader(&logs_columns, opts.batch_size)
        .context(DataObjectSnafu)?;

    let state = ScanState {
        ctx: ctx.clone(),
        reader: Box::new(reader),
        streams: opts.streams_section,
        wanted,
        label_names,
        label_cache: HashMap::new(),
        sources,
        schema: schema.clone(),
        batch_size: opts.batch_size,
        current: None,
    };

    let inner = futures::stream::try_unfold(state, |mut state| async move {
        Ok::<_, ScanError>(state.next_batch()?.map(|batch| (batch, state)))
    })
    .boxed();

    Ok(DataObjScan { schema, inner })
}

/// Where an output column's values come from.
#[derive(Clone, Copy, Debug)]
enum Source {
    /// Index into the scan's label names.
    Label(usize),
    /// Index into the requested metadata keys.
    Metadata(usize),
    Timestamp,
    Message,
}

type LabelValues = Arc<[Option<String>]>;

struct ScanState {
    ctx: QueryContext,
    reader: Box<dyn Iterator<Item = DataObjResult<LogsBatch>> + Send>,
    streams: StreamsSection,
    wanted: HashSet<StreamId>,
    label_names: Vec<String>,
    label_cache: HashMap<StreamId, LabelValues>,
    sources: Vec<Source>,
    schema: SchemaRef,
    batch_size: usize,
    // Decoded batch and the next row to consume from it.
    current: Option<(LogsBatch, usize)>,
}

impl ScanState {
    /// Assemble the next output batch, or `None` once input is exhausted.
    fn next_batch(&mut self) -> ScanResult<Option<RecordBatch>> {
        self.ctx.check().context(ContextSnafu)?;

        let mut out = BatchAssembler::new(&self.sources, self.batch_size);
        while out.rows < self.batch_size {
            if self.current.is_none() {
                match self.reader.next() {
                    Some(batch) => self.current = Some((batch.context(DataObjectSnafu)?, 0)),
                    None => break,
                }
            }
            let Some((batch, offset)) = self.current.as_mut() else {
                break;
            };

            while *offset < batch.num_rows() && out.rows < self.batch_size {
                let row = *offset;
                *offset += 1;
                let id = batch.stream_ids().value(row);
                if !self.wanted.contains(&id) {
                    continue;
                }
                let labels = self
                    .label_cache
                    .entry(id)
                    .or_insert_with(|| stream_labels(&self.streams, &self.label_names, id));
                out.push_row(&self.sources, batch, row, labels);
            }

            if *offset >= batch.num_rows() {
                self.current = None;
            }
        }

        if out.rows == 0 {
            return Ok(None);
        }
        out.finish(self.schema.clone()).map(Some)
    }
}

fn stream_labels(streams: &StreamsSection, names: &[String], id: StreamId) -> LabelValues {
    let stream = streams.get(id);
    names
        .iter()
        .map(|name| {
            stream
                .and_then(|s| s.labels.get(name))
                .map(str::to_string)
        })
        .collect()
}

enum ColumnBuilder {
    Utf8(StringBuilder),
    Timestamp(TimestampNanosecondBuilder),
}

struct BatchAssembler {
    builders: Vec<ColumnBuilder>,
    rows: usize,
}

impl BatchAssembler {
    fn new(sources: &[Source], capacity: usize) -> Self {
        let builders = sources
            .iter()
            .map(|source| match source {
                Source::Timestamp => {
                    ColumnBuilder::Timestamp(TimestampNanosecondBuilder::with_capacity(capacity))
                }
                _ => ColumnBuilder::Utf8(StringBuilder::with_capacity(capacity, capacity * 16)),
            })
            .collect();
        Self { builders, rows: 0 }
    }

    fn push_row(&mut self, sources: &[Source], batch: &LogsBatch, row: usize, labels: &LabelValues) {
        for (source, builder) in sources.iter().zip(self.builders.iter_mut()) {
            match (source, builder) {
                (Source::Timestamp, ColumnBuilder::Timestamp(b)) => {
                    b.append_value(batch.timestamps().value(row));
                }
                (Source::Label(i), ColumnBuilder::Utf8(b)) => {
                    b.append_option(labels.get(*i).and_then(Option::as_deref));
                }
                (Source::Metadata(i), ColumnBuilder::Utf8(b)) => {
                    b.append_option(
                        batch
                            .metadata(*i)
                            .filter(|col| col.is_valid(row))
                            .map(|col| col.value(row)),
                    );
                }
                (Source::Message, ColumnBuilder::Utf8(b)) => {
                    b.append_option(
                        batch
                            .message()
                            .filter(|col| col.is_valid(row))
                            .map(|col| col.value(row)),
                    );
                }
                (_, ColumnBuilder::Utf8(b)) => b.append_null(),
                (_, ColumnBuilder::Timestamp(b)) => b.append_null(),
            }
        }
        self.rows += 1;
    }

    fn finish(self, schema: SchemaRef) -> ScanResult<RecordBatch> {
        let columns: Vec<ArrayRef> = self
            .builders
            .into_iter()
            .map(|builder| -> ArrayRef {
                match builder {
                    ColumnBuilder::Utf8(mut b) => Arc::new(b.finish()),
                    ColumnBuilder::Timestamp(mut b) => {
                        Arc::new(b.finish().with_timezone("UTC"))
                    }
                }
            })
            .collect();
        let options = RecordBatchOptions::new().with_row_count(Some(self.rows));
        RecordBatch::try_new_with_options(schema, columns, &options).context(ArrowSnafu)
    }
}
