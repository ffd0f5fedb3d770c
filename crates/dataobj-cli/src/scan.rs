//! `scan`: print the rows of every logs section of one object.

use arrow::{record_batch::RecordBatch, util::pretty::pretty_format_batches};
use dataobj_core::{
    dataobj::{DataObject, LogsSection, SectionKind, StreamsSection},
    scan::{ColumnRef, DataObjScanOptions, new_dataobj_scan},
};
use futures::TryStreamExt;
use snafu::ResultExt;

use crate::{
    Env,
    error::{CliResult, DataObjectSnafu, RenderSnafu, ScanSnafu},
};

pub async fn cmd_scan(
    env: &Env,
    object: &str,
    stream_ids: &[i64],
    columns: Vec<ColumnRef>,
    batch_size: usize,
) -> CliResult<()> {
    let ctx = &env.ctx;
    let obj = DataObject::open(ctx, &env.storage, object)
        .await
        .context(DataObjectSnafu)?;

    for logs_raw in obj.sections_of(SectionKind::Logs) {
        let streams_raw = obj.require_streams_for(logs_raw).context(DataObjectSnafu)?;
        let streams_section = StreamsSection::open(ctx, streams_raw).context(DataObjectSnafu)?;
        let logs_section = LogsSection::open(ctx, logs_raw).context(DataObjectSnafu)?;

        let ids = if stream_ids.is_empty() {
            streams_section.iter().map(|s| s.id).collect()
        } else {
            stream_ids.to_vec()
        };
        let scan = new_dataobj_scan(
            ctx,
            DataObjScanOptions {
                streams_section,
                logs_section,
                stream_ids: ids,
                projections: columns.clone(),
                batch_size,
            },
        )
        .context(ScanSnafu)?;
        let batches: Vec<RecordBatch> = scan.try_collect().await.context(ScanSnafu)?;

        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        println!("logs section {} ({rows} rows)", logs_raw.ordinal());
        if rows > 0 {
            println!("{}", pretty_format_batches(&batches).context(RenderSnafu)?);
        }
    }
    Ok(())
}
