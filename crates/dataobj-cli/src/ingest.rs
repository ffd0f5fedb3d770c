//! `ingest`: JSON-lines records to one uploaded, indexed data object.

use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Utc};
use dataobj_core::{
    Labels,
    dataobj::{LogEntry, LogStream, LogsObjectBuilder, Uploader},
    metastore::Updater,
};
use log::info;
use serde::Deserialize;
use snafu::ResultExt;

use crate::{
    Env,
    error::{
        CliResult, DataObjectSnafu, EmptyInputSnafu, MetastoreSnafu, ParseRecordSnafu,
        ReadInputSnafu, RecordLabelsSnafu, RecordTimestampSnafu,
    },
};

#[derive(Debug, Deserialize)]
struct InputRecord {
    labels: String,
    timestamp: String,
    line: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

fn parse_records(path: &Path, raw: &str) -> CliResult<Vec<LogStream>> {
    let mut streams = Vec::new();
    for (idx, text) in raw.lines().enumerate() {
        let line = idx + 1;
        if text.trim().is_empty() {
            continue;
        }
        let record: InputRecord = serde_json::from_str(text).context(ParseRecordSnafu { line })?;
        let labels: Labels = record.labels.parse().context(RecordLabelsSnafu { line })?;
        let timestamp = DateTime::parse_from_rfc3339(&record.timestamp)
            .context(RecordTimestampSnafu {
                line,
                value: record.timestamp.clone(),
            })?
            .with_timezone(&Utc);

        // The builder merges entries of identical label sets.
        streams.push(LogStream {
            labels,
            entries: vec![
                LogEntry::new(timestamp, record.line)
                    .with_metadata(Labels::from_pairs(record.metadata)),
            ],
        });
    }
    snafu::ensure!(!streams.is_empty(), EmptyInputSnafu { path });
    Ok(streams)
}

pub async fn cmd_ingest(env: &Env, input: &Path) -> CliResult<()> {
    let raw = tokio::fs::read_to_string(input)
        .await
        .context(ReadInputSnafu { path: input })?;
    let streams = parse_records(input, &raw)?;

    let mut builder = LogsObjectBuilder::new(env.config.builder).context(DataObjectSnafu)?;
    for stream in streams {
        builder.append(stream);
    }
    let (bytes, stats) = builder.flush().context(DataObjectSnafu)?;

    let uploader =
        Uploader::new(env.storage.clone(), env.config.uploader).context(DataObjectSnafu)?;
    env.register_metrics(|r| uploader.register_metrics(r));
    let path = uploader
        .upload(&env.ctx, bytes)
        .await
        .context(DataObjectSnafu)?;

    let updater =
        Updater::new(env.storage.clone(), env.config.metastore).context(MetastoreSnafu)?;
    env.register_metrics(|r| updater.register_metrics(r));
    updater
        .update(&env.ctx, &path, stats.min_timestamp, stats.max_timestamp)
        .await
        .context(MetastoreSnafu)?;

    info!(
        "ingested {} rows in {} streams from {}",
        stats.rows,
        stats.streams,
        input.display()
    );
    println!("Indexed object {path}");
    println!(
        "  streams: {}, rows: {}, logs sections: {}, span: {} .. {}",
        stats.streams,
        stats.rows,
        stats.logs_sections,
        stats.min_timestamp.to_rfc3339(),
        stats.max_timestamp.to_rfc3339()
    );
    Ok(())
}
