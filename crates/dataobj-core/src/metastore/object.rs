//! Object-storage-backed metastore queries.
//!
//! Every query resolves candidates in two steps:
//!
//! 1. Coarse pruning: list the tenant's partition windows, keep the windows
//!    intersecting `[start, end]`, read their index objects, and keep the
//!    entries whose span intersects the query window (deduplicated by path).
//! 2. Fine pruning: open each candidate object's Streams sections and keep
//!    streams that are in-window and satisfy every matcher.
//!
//! Objects are fetched with bounded concurrency (`fetch_concurrency`). The
//! first failure aborts the query and drops every in-flight fetch.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use arrow::array::Array;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use log::debug;
use prometheus_client::registry::Registry;
use snafu::prelude::*;

use crate::{
    config::MetastoreConfig,
    context::QueryContext,
    dataobj::{
        DataObject, IndexEntry, IndexSection, LogsColumns, LogsSection, SectionKind, Stream,
        StreamId, StreamsSection, timestamp_from_nanos,
    },
    labels::LabelMatcher,
    metastore::{
        Metastore, MetastoreError, SectionDescriptor, StreamIdsResult,
        error::{
            ConfigSnafu, ContextSnafu, CorruptIndexSnafu, DataObjectSnafu, InvalidTimeRangeSnafu,
            MetastoreResult, StorageSnafu,
        },
        layout::{metastore_prefix, window_overlaps, window_prefix},
    },
    metrics::{MetastoreMetrics, QueryOperation},
    storage::StorageLocation,
};

// Rows decoded per batch when evaluating section predicates.
const PREDICATE_BATCH_ROWS: usize = 8192;

/// Matching streams of one Streams section.
#[derive(Debug)]
struct MatchedSection {
    path: String,
    section: u32,
    streams: Vec<Stream>,
}

/// Running summary of the records that survive pruning in one Logs section.
#[derive(Debug, Default)]
struct SurvivingRecords {
    stream_ids: BTreeSet<StreamId>,
    rows: u64,
    min: Option<i64>,
    max: Option<i64>,
}

impl SurvivingRecords {
    fn add(&mut self, stream_id: StreamId, ts: i64) {
        self.stream_ids.insert(stream_id);
        self.rows += 1;
        self.min = Some(self.min.map_or(ts, |m| m.min(ts)));
        self.max = Some(self.max.map_or(ts, |m| m.max(ts)));
    }

    fn into_descriptor(self, path: &str, section: u32) -> Option<SectionDescriptor> {
        Some(SectionDescriptor {
            path: path.to_string(),
            section,
            stream_ids: self.stream_ids.into_iter().collect(),
            row_count: self.rows,
            min_timestamp: timestamp_from_nanos(self.min?),
            max_timestamp: timestamp_from_nanos(self.max?),
        })
    }
}

/// Nanoseconds since the epoch, saturating outside the representable range.
fn nanos_saturating(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or(if ts.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

/// Metastore reading index and data objects from a [`StorageLocation`].
#[derive(Clone, Debug)]
pub struct ObjectMetastore {
    storage: StorageLocation,
    config: MetastoreConfig,
    metrics: MetastoreMetrics,
}

impl ObjectMetastore {
    /// Create a metastore after validating `config`.
    pub fn new(storage: StorageLocation, config: MetastoreConfig) -> MetastoreResult<Self> {
        config.validate().context(ConfigSnafu)?;
        Ok(Self {
            storage,
            config,
            metrics: MetastoreMetrics::default(),
        })
    }

    /// Register the query and object-fetch counters with `registry`.
    pub fn register_metrics(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    /// Index entries of the context's tenant intersecting `[start, end]`,
    /// one per object path, sorted by path.
    pub async fn entries(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MetastoreResult<Vec<IndexEntry>> {
        ensure!(start <= end, InvalidTimeRangeSnafu { start, end });

        let tenant = ctx.tenant();
        let width = self.config.partition_window();
        let windows = ctx
            .run(self.storage.list_dirs(&metastore_prefix(tenant)))
            .await
            .context(ContextSnafu)?;
        let windows = match windows {
            Ok(dirs) => dirs,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e).context(StorageSnafu),
        };

        let mut keys = Vec::new();
        for dir in windows {
            let window: i64 = dir.parse().ok().context(CorruptIndexSnafu {
                path: format!("{}/{dir}", metastore_prefix(tenant)),
                msg: "window directory is not a number",
            })?;
            if !window_overlaps(window, width, start, end) {
                continue;
            }
            let listed = ctx
                .run(self.storage.list_prefix(&window_prefix(tenant, window)))
                .await
                .context(ContextSnafu)?
                .context(StorageSnafu)?;
            keys.extend(listed);
        }
        debug!(
            "metastore query for tenant {tenant}: {} index object(s) in window",
            keys.len()
        );
        self.metrics.index_objects_read.inc_by(keys.len() as u64);

        let per_key: Vec<Vec<IndexEntry>> = stream::iter(keys)
            .map(|key| async move {
                let obj = DataObject::open(ctx, &self.storage, &key)
                    .await
                    .context(DataObjectSnafu { path: key.clone() })?;
                let mut entries = Vec::new();
                for raw in obj.sections_of(SectionKind::Index) {
                    let section = IndexSection::open(ctx, raw)
                        .context(DataObjectSnafu { path: key.clone() })?;
                    entries.extend(section.into_entries());
                }
                Ok::<_, MetastoreError>(entries)
            })
            .buffer_unordered(self.config.fetch_concurrency)
            .try_collect()
            .await?;

        let mut by_path: BTreeMap<String, IndexEntry> = BTreeMap::new();
        for entry in per_key.into_iter().flatten() {
            if !entry.overlaps(start, end) {
                continue;
            }
            by_path
                .entry(entry.path.clone())
                .and_modify(|existing| {
                    existing.min_timestamp = existing.min_timestamp.min(entry.min_timestamp);
                    existing.max_timestamp = existing.max_timestamp.max(entry.max_timestamp);
                })
                .or_insert(entry);
        }
        Ok(by_path.into_values().collect())
    }

    /// Fetch every candidate object, apply `f` to it and concatenate the
    /// results. Objects yielding nothing count as pruned.
    async fn map_objects<T, F>(
        &self,
        ctx: &QueryContext,
        entries: Vec<IndexEntry>,
        f: F,
    ) -> MetastoreResult<Vec<T>>
    where
        T: Send,
        F: Fn(&IndexEntry, &DataObject) -> MetastoreResult<Vec<T>> + Sync,
    {
        let f = &f;
        let per_object: Vec<Vec<T>> = stream::iter(entries)
            .map(|entry| async move {
                let obj = DataObject::open(ctx, &self.storage, &entry.path)
                    .await
                    .context(DataObjectSnafu {
                        path: entry.path.clone(),
                    })?;
                self.metrics.objects_fetched.inc();
                let out = f(&entry, &obj)?;
                if out.is_empty() {
                    self.metrics.objects_pruned.inc();
                }
                Ok::<_, MetastoreError>(out)
            })
            .buffer_unordered(self.config.fetch_concurrency)
            .try_collect()
            .await?;
        Ok(per_object.into_iter().flatten().collect())
    }

    /// In-window streams satisfying `matchers`, grouped per Streams section.
    async fn matching_streams(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> MetastoreResult<Vec<MatchedSection>> {
        let entries = self.entries(ctx, start, end).await?;
        let mut matched = self
            .map_objects(ctx, entries, |entry, obj| {
                let mut out = Vec::new();
                for raw in obj.sections_of(SectionKind::Streams) {
                    let section = StreamsSection::open(ctx, raw).context(DataObjectSnafu {
                        path: entry.path.clone(),
                    })?;
                    let streams: Vec<Stream> = section
                        .iter()
                        .filter(|s| s.overlaps(start, end) && s.labels.matches_all(matchers))
                        .cloned()
                        .collect();
                    if !streams.is_empty() {
                        out.push(MatchedSection {
                            path: entry.path.clone(),
                            section: section.ordinal(),
                            streams,
                        });
                    }
                }
                Ok(out)
            })
            .await?;

        matched.sort_by(|a, b| a.path.cmp(&b.path).then(a.section.cmp(&b.section)));
        Ok(matched)
    }

    /// Surviving records of every Logs section of `obj`.
    fn prune_sections(
        ctx: &QueryContext,
        entry: &IndexEntry,
        obj: &DataObject,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
        predicates: &[LabelMatcher],
    ) -> MetastoreResult<Vec<SectionDescriptor>> {
        let path = entry.path.as_str();
        let (start_ns, end_ns) = (nanos_saturating(start), nanos_saturating(end));
        let columns = LogsColumns {
            metadata: predicates.iter().map(|p| p.name().to_string()).collect(),
            message: false,
        };

        // Matching stream IDs per Streams section ordinal.
        let mut matching: HashMap<u32, BTreeSet<StreamId>> = HashMap::new();
        let mut out = Vec::new();
        for raw in obj.sections_of(SectionKind::Logs) {
            let streams_raw = obj
                .require_streams_for(raw)
                .context(DataObjectSnafu { path })?;
            if !matching.contains_key(&streams_raw.ordinal()) {
                let section =
                    StreamsSection::open(ctx, streams_raw).context(DataObjectSnafu { path })?;
                let ids = section
                    .iter()
                    .filter(|s| s.overlaps(start, end) && s.labels.matches_all(matchers))
                    .map(|s| s.id)
                    .collect();
                matching.insert(streams_raw.ordinal(), ids);
            }
            let Some(ids) = matching.get(&streams_raw.ordinal()) else {
                continue;
            };
            if ids.is_empty() {
                continue;
            }

            let logs = LogsSection::open(ctx, raw).context(DataObjectSnafu { path })?;
            let mut surviving = SurvivingRecords::default();
            for batch in logs
                .reader(&columns, PREDICATE_BATCH_ROWS)
                .context(DataObjectSnafu { path })?
            {
                ctx.check().context(ContextSnafu)?;
                let batch = batch.context(DataObjectSnafu { path })?;
                let stream_ids = batch.stream_ids();
                let timestamps = batch.timestamps();
                for row in 0..batch.num_rows() {
                    let stream_id = stream_ids.value(row);
                    let ts = timestamps.value(row);
                    if ts < start_ns || ts > end_ns || !ids.contains(&stream_id) {
                        continue;
                    }
                    let passes = predicates.iter().enumerate().all(|(i, p)| {
                        let value = batch
                            .metadata(i)
                            .filter(|col| col.is_valid(row))
                            .map(|col| col.value(row));
                        p.matches(value)
                    });
                    if passes {
                        surviving.add(stream_id, ts);
                    }
                }
            }

            if let Some(descriptor) = surviving.into_descriptor(path, logs.ordinal()) {
                out.push(descriptor);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Metastore for ObjectMetastore {
    async fn labels(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> MetastoreResult<BTreeSet<String>> {
        self.metrics.query(QueryOperation::Labels);
        let matched = self.matching_streams(ctx, start, end, matchers).await?;
        Ok(matched
            .iter()
            .flat_map(|m| &m.streams)
            .flat_map(|s| s.labels.names().map(str::to_string))
            .collect())
    }

    async fn values(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> MetastoreResult<BTreeSet<String>> {
        self.metrics.query(QueryOperation::Values);
        let matched = self.matching_streams(ctx, start, end, matchers).await?;
        Ok(matched
            .iter()
            .flat_map(|m| &m.streams)
            .flat_map(|s| s.labels.iter().map(|(_, v)| v.to_string()))
            .collect())
    }

    async fn stream_ids(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> MetastoreResult<Vec<StreamIdsResult>> {
        self.metrics.query(QueryOperation::StreamIds);
        let matched = self.matching_streams(ctx, start, end, matchers).await?;
        Ok(matched
            .into_iter()
            .map(|m| StreamIdsResult {
                path: m.path,
                stream_ids: m.streams.iter().map(|s| s.id).collect(),
                section: m.section,
            })
            .collect())
    }

    async fn sections(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
        predicates: &[LabelMatcher],
    ) -> MetastoreResult<Vec<SectionDescriptor>> {
        self.metrics.query(QueryOperation::Sections);
        if matchers.is_empty() {
            debug!("sections query without matchers selects nothing");
            return Ok(Vec::new());
        }

        let entries = self.entries(ctx, start, end).await?;
        let mut sections = self
            .map_objects(ctx, entries, |entry, obj| {
                Self::prune_sections(ctx, entry, obj, start, end, matchers, predicates)
            })
            .await?;
        sections.sort_by(|a, b| a.path.cmp(&b.path).then(a.section.cmp(&b.section)));
        Ok(sections)
    }
}
