//! Query path for log data objects stored in object storage.
//!
//! This crate provides the pieces needed to make log queries over immutable,
//! columnar "data objects" tractable:
//!
//! - A sectioned data object container whose Streams and Logs sections are
//!   independently decodable Parquet payloads (`dataobj` module).
//! - An append-only, time-partitioned metastore that records every committed
//!   object per tenant and answers pruning queries (label names, label
//!   values, stream IDs, candidate sections) for a time window and a set of
//!   label matchers (`metastore` module).
//! - A columnar scan that joins a Streams section with a Logs section for a
//!   set of stream IDs and a column projection, producing Arrow
//!   `RecordBatch`es while keeping label and structured-metadata columns in
//!   separate namespaces (`scan` module).
//! - Object-storage helpers over `object_store` (`storage` module) and a
//!   tenant-carrying, cancellable query context (`context` module).
//! - Prometheus counters: the updater, the uploader and the object metastore
//!   each expose `register_metrics` for a `prometheus_client` registry.
//!
//! Writers build objects with [`dataobj::LogsObjectBuilder`], upload them with
//! [`dataobj::Uploader`], and register them with [`metastore::Updater`].
//! Readers resolve candidates through [`metastore::ObjectMetastore`] and
//! then scan the relevant sections with [`scan::new_dataobj_scan`].
#![deny(missing_docs)]
pub mod config;
pub mod context;
pub mod dataobj;
pub mod labels;
pub mod metastore;
mod metrics;
pub mod scan;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{BuilderConfig, Config, MetastoreConfig, UploaderConfig};
pub use context::{CancelHandle, ContextError, QueryContext, TenantId};
pub use labels::{LabelMatcher, Labels, MatchType};
pub use storage::StorageLocation;
