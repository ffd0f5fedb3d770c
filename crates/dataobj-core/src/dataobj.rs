//! Data objects: immutable, sectioned, columnar containers of log data.
//!
//! A data object is written once and never mutated. It holds an ordered
//! sequence of typed sections, each an independently decodable Parquet
//! payload:
//!
//! - **Streams** sections map object-local stream IDs to label sets and
//!   per-stream statistics.
//! - **Logs** sections hold the log records (stream ID, timestamp, structured
//!   metadata, message) in the writer's sort order.
//! - **Index** sections are used by the metastore for its own entries.
//!
//! The same kind may appear more than once when a build-time threshold
//! splits an object. Every Logs section is described by the closest
//! Streams section that precedes it in the object.
//!
//! Submodules:
//! - `object`: container framing ([`DataObject`], [`RawSection`]).
//! - `sections`: typed section handles ([`StreamsSection`], [`LogsSection`],
//!   [`IndexSection`]).
//! - `builder`: [`LogsObjectBuilder`] for the writer path.
//! - `uploader`: content-addressed [`Uploader`].

use std::fmt;

use serde::{Deserialize, Serialize};

mod builder;
mod error;
mod object;
mod parquet_io;
mod sections;
mod uploader;

pub use builder::{FlushStats, LogEntry, LogStream, LogsObjectBuilder};
pub use error::{DataObjError, DataObjResult};
pub use object::{DataObject, RawSection};
pub use sections::{
    IndexEntry, IndexSection, LogsColumns, LogsSection, Stream, StreamId, StreamsSection,
};
pub use uploader::Uploader;

pub(crate) use object::ObjectEncoder;
pub(crate) use parquet_io::timestamp_type;
pub(crate) use sections::{LogsBatch, MESSAGE, TIMESTAMP, timestamp_from_nanos};

/// Field-metadata key tagging the role of a section column.
pub const COLUMN_ROLE_KEY: &str = "dataobj.column";

/// Type of a section within a data object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    /// Stream ID to label set.
    Streams,
    /// Log records.
    Logs,
    /// Metastore index entries.
    Index,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SectionKind::Streams => "streams",
            SectionKind::Logs => "logs",
            SectionKind::Index => "index",
        };
        f.write_str(s)
    }
}
