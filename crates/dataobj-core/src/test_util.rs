//! Shared fixtures for unit tests.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::{
    config::BuilderConfig,
    context::{QueryContext, TenantId},
    dataobj::{LogEntry, LogStream, LogsObjectBuilder},
    labels::Labels,
};

pub(crate) fn tenant() -> TenantId {
    TenantId::new("test-tenant").expect("valid tenant")
}

pub(crate) fn ctx() -> QueryContext {
    QueryContext::new(tenant())
}

/// Timestamp `secs` seconds after the Unix epoch.
pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("in range")
}

/// Parse a selector, panicking on bad fixtures.
pub(crate) fn labels(selector: &str) -> Labels {
    selector.parse().expect("valid selector")
}

/// Entry with `key=value` metadata pairs.
pub(crate) fn entry(secs: i64, line: &str, metadata: &[(&str, &str)]) -> LogEntry {
    LogEntry::new(ts(secs), line).with_metadata(Labels::from_pairs(metadata.iter().copied()))
}

/// Encode one object holding the given streams.
pub(crate) fn build_object(streams: Vec<LogStream>) -> Bytes {
    let mut builder = LogsObjectBuilder::new(BuilderConfig::default()).expect("default config");
    for stream in streams {
        builder.append(stream);
    }
    builder.flush().expect("non-empty object").0
}
