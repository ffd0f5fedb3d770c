//! Prometheus counters for the writer and query paths.
//!
//! Every component creates its counters on construction and exposes a
//! `register_metrics(&mut Registry)` method. Counters are shared handles, so
//! clones of a component keep updating the same series after registration.

use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counters of [`crate::metastore::Updater`].
#[derive(Clone, Debug, Default)]
pub(crate) struct UpdaterMetrics {
    pub(crate) updates: Counter,
    pub(crate) update_failures: Counter,
    pub(crate) index_commits: Counter,
    pub(crate) commit_conflicts: Counter,
}

impl UpdaterMetrics {
    pub(crate) fn register(&self, registry: &mut Registry) {
        registry.register(
            "dataobj_metastore_updates",
            "Data objects successfully recorded in the metastore",
            self.updates.clone(),
        );
        registry.register(
            "dataobj_metastore_update_failures",
            "Metastore updates that returned an error",
            self.update_failures.clone(),
        );
        registry.register(
            "dataobj_metastore_index_commits",
            "Index version files written, one per partition window",
            self.index_commits.clone(),
        );
        registry.register(
            "dataobj_metastore_commit_conflicts",
            "Index commits that lost a create-only race and were retried",
            self.commit_conflicts.clone(),
        );
    }
}

/// Counters of [`crate::dataobj::Uploader`].
#[derive(Clone, Debug, Default)]
pub(crate) struct UploaderMetrics {
    pub(crate) uploads: Counter,
    pub(crate) upload_bytes: Counter,
    pub(crate) reused_uploads: Counter,
    pub(crate) upload_failures: Counter,
}

impl UploaderMetrics {
    pub(crate) fn register(&self, registry: &mut Registry) {
        registry.register(
            "dataobj_uploads",
            "Data objects written to object storage",
            self.uploads.clone(),
        );
        registry.register(
            "dataobj_upload_bytes",
            "Bytes of data objects written to object storage",
            self.upload_bytes.clone(),
        );
        registry.register(
            "dataobj_reused_uploads",
            "Uploads whose content-addressed path already existed",
            self.reused_uploads.clone(),
        );
        registry.register(
            "dataobj_upload_failures",
            "Uploads rejected by object storage",
            self.upload_failures.clone(),
        );
    }
}

/// Pruning operation served by the metastore.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum QueryOperation {
    Labels,
    Values,
    StreamIds,
    Sections,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub(crate) struct QueryLabels {
    pub(crate) operation: QueryOperation,
}

/// Counters of [`crate::metastore::ObjectMetastore`].
#[derive(Clone, Debug, Default)]
pub(crate) struct MetastoreMetrics {
    pub(crate) queries: Family<QueryLabels, Counter>,
    pub(crate) index_objects_read: Counter,
    pub(crate) objects_fetched: Counter,
    pub(crate) objects_pruned: Counter,
}

impl MetastoreMetrics {
    pub(crate) fn query(&self, operation: QueryOperation) {
        self.queries.get_or_create(&QueryLabels { operation }).inc();
    }

    pub(crate) fn register(&self, registry: &mut Registry) {
        registry.register(
            "dataobj_metastore_queries",
            "Metastore pruning queries by operation",
            self.queries.clone(),
        );
        registry.register(
            "dataobj_metastore_index_objects_read",
            "Index version files read while resolving query windows",
            self.index_objects_read.clone(),
        );
        registry.register(
            "dataobj_metastore_objects_fetched",
            "Candidate data objects opened by pruning queries",
            self.objects_fetched.clone(),
        );
        registry.register(
            "dataobj_metastore_objects_pruned",
            "Candidate data objects that contributed nothing to a query",
            self.objects_pruned.clone(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(registry: &Registry) -> String {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, registry).expect("encode");
        out
    }

    #[test]
    fn counters_are_shared_with_the_registry() {
        let metrics = UpdaterMetrics::default();
        let mut registry = Registry::default();
        metrics.register(&mut registry);

        let clone = metrics.clone();
        clone.updates.inc();
        clone.commit_conflicts.inc_by(2);

        let text = encode(&registry);
        assert!(text.contains("# HELP dataobj_metastore_updates "), "{text}");
        assert!(text.contains("dataobj_metastore_updates_total 1"), "{text}");
        assert!(text.contains("dataobj_metastore_commit_conflicts_total 2"), "{text}");
        assert!(text.contains("dataobj_metastore_update_failures_total 0"), "{text}");
    }

    #[test]
    fn queries_are_labelled_by_operation() {
        let metrics = MetastoreMetrics::default();
        let mut registry = Registry::default();
        metrics.register(&mut registry);

        metrics.query(QueryOperation::Sections);
        metrics.query(QueryOperation::Sections);
        metrics.query(QueryOperation::Labels);

        let text = encode(&registry);
        assert!(
            text.contains(r#"dataobj_metastore_queries_total{operation="Sections"} 2"#),
            "{text}"
        );
        assert!(
            text.contains(r#"dataobj_metastore_queries_total{operation="Labels"} 1"#),
            "{text}"
        );
    }
}
