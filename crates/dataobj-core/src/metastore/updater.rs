//! Appending index entries for newly committed data objects.
//!
//! Each partition window holds a sequence of zero-padded version files.
//! A commit lists the window, then creates `max_version + 1` with
//! create-only semantics. The create is the concurrency guard: when two
//! writers race for the same version, exactly one succeeds and the other
//! re-lists and tries the next version. Entries are never rewritten, so a
//! crash can at worst leave an object indexed in some of its windows; a
//! retried update re-appends the entry and readers dedupe by path.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use prometheus_client::registry::Registry;
use snafu::prelude::*;

use crate::{
    config::MetastoreConfig,
    context::QueryContext,
    dataobj::{IndexEntry, IndexSection, ObjectEncoder, SectionKind},
    metastore::{
        error::{
            CommitConflictSnafu, ConfigSnafu, ContextSnafu, CorruptIndexSnafu, DataObjectSnafu,
            InvalidTimeRangeSnafu, MetastoreResult, StorageSnafu,
        },
        layout::{parse_version, version_path, window_prefix, windows_between},
    },
    metrics::UpdaterMetrics,
    storage::StorageLocation,
};

/// Records committed data objects in the tenant's metastore.
#[derive(Clone, Debug)]
pub struct Updater {
    storage: StorageLocation,
    config: MetastoreConfig,
    metrics: UpdaterMetrics,
}

impl Updater {
    /// Create an updater after validating `config`.
    pub fn new(storage: StorageLocation, config: MetastoreConfig) -> MetastoreResult<Self> {
        config.validate().context(ConfigSnafu)?;
        Ok(Self {
            storage,
            config,
            metrics: UpdaterMetrics::default(),
        })
    }

    /// Register the update, commit and conflict counters with `registry`.
    pub fn register_metrics(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    /// Record `path` spanning `[min_timestamp, max_timestamp]` for the
    /// context's tenant.
    ///
    /// The object must already be uploaded. After this returns `Ok`, every
    /// query whose window intersects the span will see the object. On error
    /// the object stays uploaded but may be undiscoverable; retry this call,
    /// not the upload.
    pub async fn update(
        &self,
        ctx: &QueryContext,
        path: &str,
        min_timestamp: DateTime<Utc>,
        max_timestamp: DateTime<Utc>,
    ) -> MetastoreResult<()> {
        let result = self
            .append_entry(ctx, path, min_timestamp, max_timestamp)
            .await;
        match result {
            Ok(()) => self.metrics.updates.inc(),
            Err(_) => self.metrics.update_failures.inc(),
        };
        result
    }

    async fn append_entry(
        &self,
        ctx: &QueryContext,
        path: &str,
        min_timestamp: DateTime<Utc>,
        max_timestamp: DateTime<Utc>,
    ) -> MetastoreResult<()> {
        ensure!(
            min_timestamp <= max_timestamp,
            InvalidTimeRangeSnafu {
                start: min_timestamp,
                end: max_timestamp,
            }
        );

        let entry = IndexEntry {
            path: path.to_string(),
            min_timestamp,
            max_timestamp,
        };
        let payload = encode_entry(&entry)?;

        let width = self.config.partition_window();
        let mut windows = 0usize;
        for window in windows_between(min_timestamp, max_timestamp, width) {
            let version = self.commit_to_window(ctx, window, payload.clone()).await?;
            debug!("indexed {path} in window {window} as version {version}");
            windows += 1;
        }

        info!(
            "indexed object {path} for tenant {} in {windows} window(s)",
            ctx.tenant()
        );
        Ok(())
    }

    async fn commit_to_window(
        &self,
        ctx: &QueryContext,
        window: i64,
        payload: Bytes,
    ) -> MetastoreResult<u64> {
        let tenant = ctx.tenant();
        let attempts = self.config.max_commit_attempts;

        for attempt in 1..=attempts {
            let current = self.latest_version(ctx, window).await?;
            let version = current.checked_add(1).context(CorruptIndexSnafu {
                path: window_prefix(tenant, window),
                msg: "version counter overflow",
            })?;
            let key = version_path(tenant, window, version);

            let written = ctx
                .run(self.storage.write_new(&key, payload.clone()))
                .await
                .context(ContextSnafu)?;
            match written {
                Ok(()) => {
                    self.metrics.index_commits.inc();
                    return Ok(version);
                }
                Err(e) if e.is_already_exists() => {
                    self.metrics.commit_conflicts.inc();
                    warn!(
                        "metastore commit conflict at {key} (attempt {attempt}/{attempts}); retrying"
                    );
                }
                Err(e) => return Err(e).context(StorageSnafu),
            }
        }

        CommitConflictSnafu { window, attempts }.fail()
    }

    /// Highest committed version in `window`, or 0 when the window is empty.
    async fn latest_version(&self, ctx: &QueryContext, window: i64) -> MetastoreResult<u64> {
        let prefix = window_prefix(ctx.tenant(), window);
        let keys = ctx
            .run(self.storage.list_prefix(&prefix))
            .await
            .context(ContextSnafu)?
            .context(StorageSnafu)?;

        let mut latest = 0;
        for key in keys {
            let version = parse_version(&key).context(CorruptIndexSnafu {
                path: key.clone(),
                msg: "not a metastore version file",
            })?;
            latest = latest.max(version);
        }
        Ok(latest)
    }
}

fn encode_entry(entry: &IndexEntry) -> MetastoreResult<Bytes> {
    let mut encoder = ObjectEncoder::new();
    let section = IndexSection::encode(std::slice::from_ref(entry)).context(DataObjectSnafu {
        path: entry.path.clone(),
    })?;
    encoder.append(SectionKind::Index, &section);
    encoder.finish().context(DataObjectSnafu {
        path: entry.path.clone(),
    })
}
