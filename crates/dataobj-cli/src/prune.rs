//! Metastore pruning commands: `labels`, `values`, `streams`, `sections`.

use chrono::{DateTime, SecondsFormat, Utc};
use dataobj_core::{
    LabelMatcher,
    metastore::{Metastore, ObjectMetastore},
};
use snafu::ResultExt;

use crate::{
    Env,
    error::{CliResult, MetastoreSnafu},
};

fn metastore(env: &Env) -> CliResult<ObjectMetastore> {
    let metastore =
        ObjectMetastore::new(env.storage.clone(), env.config.metastore).context(MetastoreSnafu)?;
    env.register_metrics(|r| metastore.register_metrics(r));
    Ok(metastore)
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

pub async fn cmd_labels(
    env: &Env,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    matchers: &[LabelMatcher],
) -> CliResult<()> {
    let names = metastore(env)?
        .labels(&env.ctx, start, end, matchers)
        .await
        .context(MetastoreSnafu)?;
    for name in names {
        println!("{name}");
    }
    Ok(())
}

pub async fn cmd_values(
    env: &Env,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    matchers: &[LabelMatcher],
) -> CliResult<()> {
    let values = metastore(env)?
        .values(&env.ctx, start, end, matchers)
        .await
        .context(MetastoreSnafu)?;
    for value in values {
        println!("{value}");
    }
    Ok(())
}

pub async fn cmd_streams(
    env: &Env,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    matchers: &[LabelMatcher],
) -> CliResult<()> {
    let results = metastore(env)?
        .stream_ids(&env.ctx, start, end, matchers)
        .await
        .context(MetastoreSnafu)?;
    for r in results {
        println!(
            "{} section={} stream_ids={}",
            r.path,
            r.section,
            join_ids(&r.stream_ids)
        );
    }
    Ok(())
}

pub async fn cmd_sections(
    env: &Env,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    matchers: &[LabelMatcher],
    predicates: &[LabelMatcher],
) -> CliResult<()> {
    if matchers.is_empty() {
        eprintln!("No --matcher given; sections queries select nothing without one.");
    }
    let sections = metastore(env)?
        .sections(&env.ctx, start, end, matchers, predicates)
        .await
        .context(MetastoreSnafu)?;
    for s in sections {
        println!(
            "{} section={} rows={} stream_ids={} span={}..{}",
            s.path,
            s.section,
            s.row_count,
            join_ids(&s.stream_ids),
            s.min_timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            s.max_timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        );
    }
    Ok(())
}
