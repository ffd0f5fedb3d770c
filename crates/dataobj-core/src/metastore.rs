//! Time-partitioned metastore over committed data objects.
//!
//! The metastore is an append-only secondary index that maps
//! `(tenant, time window, label matchers)` to the data objects, streams, and
//! sections worth reading:
//!
//! - [`Updater`] appends one entry per committed object into every partition
//!   window its span touches.
//! - [`ObjectMetastore`] answers the pruning queries of the [`Metastore`]
//!   trait by reading the overlapping windows, then opening the Streams (and,
//!   for [`Metastore::sections`], Logs) sections of each candidate object.
//!
//! Window semantics: an object or stream is a candidate when its
//! `[min_timestamp, max_timestamp]` intersects the query's `[start, end]`.
//! Result sets carry no ordering contract; implementations here sort them so
//! output is stable, but callers must not rely on it.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{context::QueryContext, dataobj::StreamId, labels::LabelMatcher};

mod error;
pub(crate) mod layout;
mod object;
mod updater;

pub use error::{MetastoreError, MetastoreResult};
pub use object::ObjectMetastore;
pub use updater::Updater;

/// Matching streams inside one Streams section of one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamIdsResult {
    /// Object path.
    pub path: String,
    /// IDs of the matching streams, ascending.
    pub stream_ids: Vec<StreamId>,
    /// One-based ordinal of the Streams section holding them.
    pub section: u32,
}

/// A Logs section that may contain matching records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionDescriptor {
    /// Object path.
    pub path: String,
    /// One-based ordinal of the Logs section.
    pub section: u32,
    /// Streams with at least one surviving record in the section, ascending.
    pub stream_ids: Vec<StreamId>,
    /// Number of surviving records.
    pub row_count: u64,
    /// Earliest surviving record.
    pub min_timestamp: DateTime<Utc>,
    /// Latest surviving record.
    pub max_timestamp: DateTime<Utc>,
}

/// Pruning queries over a tenant's indexed objects.
///
/// Empty `matchers` select every in-window stream for `labels`, `values`
/// and `stream_ids`, but nothing for `sections`.
#[async_trait]
pub trait Metastore: Send + Sync {
    /// Union of label names over matching in-window streams.
    async fn labels(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> MetastoreResult<BTreeSet<String>>;

    /// Union of values of every label (not only matched ones) over matching
    /// in-window streams.
    async fn values(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> MetastoreResult<BTreeSet<String>>;

    /// Matching stream IDs per object and Streams section. Objects without
    /// matches are omitted.
    async fn stream_ids(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> MetastoreResult<Vec<StreamIdsResult>>;

    /// Logs sections holding at least one in-window record of a matching
    /// stream whose structured metadata satisfies every predicate.
    async fn sections(
        &self,
        ctx: &QueryContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
        predicates: &[LabelMatcher],
    ) -> MetastoreResult<Vec<SectionDescriptor>>;
}
