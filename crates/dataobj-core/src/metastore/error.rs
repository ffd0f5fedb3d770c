//! Error types and SNAFU context selectors for the metastore.
//!
//! Every public metastore operation returns either a complete result or one
//! of these errors. A missing or corrupt object anywhere in the candidate set
//! fails the whole query; partial pruning results are never returned.

use chrono::{DateTime, Utc};
use snafu::{Backtrace, prelude::*};

use crate::{
    config::ConfigError, context::ContextError, dataobj::DataObjError, storage::StorageError,
};

/// Result alias for metastore operations.
pub type MetastoreResult<T> = Result<T, MetastoreError>;

/// Errors from metastore updates and queries.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MetastoreError {
    /// `start` (or the object's minimum timestamp) is after `end`.
    #[snafu(display("Invalid time range: {start} is after {end}"))]
    InvalidTimeRange {
        /// Range start.
        start: DateTime<Utc>,
        /// Range end.
        end: DateTime<Utc>,
    },

    /// Every commit attempt for a partition window lost to a concurrent writer.
    #[snafu(display(
        "Could not commit index entry to window {window} after {attempts} attempts"
    ))]
    CommitConflict {
        /// Window start, seconds since the epoch.
        window: i64,
        /// Attempts made.
        attempts: u32,
    },

    /// An index key does not follow the expected naming scheme.
    #[snafu(display("Corrupt metastore state at {path}: {msg}"))]
    CorruptIndex {
        /// Offending key.
        path: String,
        /// What was wrong.
        msg: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Storage failure while listing or writing the index.
    #[snafu(display("Metastore storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(source, backtrace)]
        source: StorageError,
    },

    /// A referenced data object or index object could not be read or decoded.
    #[snafu(display("Cannot read object {path}: {source}"))]
    DataObject {
        /// Object path.
        path: String,
        /// Underlying data object error.
        #[snafu(source, backtrace)]
        source: DataObjError,
    },

    /// Cancellation or deadline.
    #[snafu(display("{source}"))]
    Context {
        /// Underlying context error.
        source: ContextError,
    },

    /// Invalid metastore configuration.
    #[snafu(display("Invalid metastore configuration: {source}"))]
    Config {
        /// Underlying validation error.
        source: ConfigError,
    },
}

impl MetastoreError {
    /// True when the error was caused by cancellation or an expired deadline,
    /// including when it surfaced while decoding an object.
    pub fn is_cancellation(&self) -> bool {
        match self {
            MetastoreError::Context { source } => matches!(
                source,
                ContextError::Cancelled | ContextError::DeadlineExceeded
            ),
            MetastoreError::DataObject { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// True when a referenced object was missing from storage.
    pub fn is_not_found(&self) -> bool {
        match self {
            MetastoreError::Storage { source } => source.is_not_found(),
            MetastoreError::DataObject { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
