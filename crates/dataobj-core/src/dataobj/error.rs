//! Error types and SNAFU context selectors for the `dataobj` module.
//!
//! Decoding errors (bad magic, truncated footers, mistyped columns) are all
//! fatal: a malformed object or section is never partially consumed.

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use snafu::{Backtrace, prelude::*};

use crate::{
    config::ConfigError,
    context::ContextError,
    dataobj::SectionKind,
    storage::StorageError,
};

/// Result alias for data object operations.
pub type DataObjResult<T> = Result<T, DataObjError>;

/// Errors produced while building, encoding, decoding or uploading data objects.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DataObjError {
    /// The object does not start and end with the container magic.
    #[snafu(display("Not a data object: bad magic"))]
    BadMagic {
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The object is shorter than its own framing claims.
    #[snafu(display("Truncated data object: {detail}"))]
    Truncated {
        /// What could not be read.
        detail: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The footer is not valid JSON for the expected layout.
    #[snafu(display("Malformed data object footer: {source}"))]
    Footer {
        /// Underlying JSON error.
        source: serde_json::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The footer declares a format this reader does not understand.
    #[snafu(display("Unsupported data object format version {version}"))]
    UnsupportedVersion {
        /// Declared version.
        version: u32,
    },

    /// A section's declared byte range falls outside the payload area.
    #[snafu(display(
        "Section {kind} at offset {offset} with length {len} exceeds payload area of {payload_len} bytes"
    ))]
    SectionBounds {
        /// Section kind.
        kind: SectionKind,
        /// Declared offset.
        offset: u64,
        /// Declared length.
        len: u64,
        /// Size of the payload area.
        payload_len: u64,
    },

    /// A section handle was opened from a raw section of another kind.
    #[snafu(display("Expected a {expected} section, got {actual}"))]
    WrongSectionKind {
        /// The kind the opener handles.
        expected: SectionKind,
        /// The kind that was passed in.
        actual: SectionKind,
    },

    /// Parquet encode or decode failure inside a section.
    #[snafu(display("Parquet error in {kind} section: {source}"))]
    Parquet {
        /// Section kind being processed.
        kind: SectionKind,
        /// Underlying parquet error.
        source: ParquetError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Arrow failure while assembling or reading section columns.
    #[snafu(display("Arrow error in {kind} section: {source}"))]
    Arrow {
        /// Section kind being processed.
        kind: SectionKind,
        /// Underlying arrow error.
        source: ArrowError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A required column is absent or has an unexpected type.
    #[snafu(display("{kind} section column {column:?} is missing or not {expected}"))]
    BadColumn {
        /// Section kind being decoded.
        kind: SectionKind,
        /// Column name.
        column: String,
        /// Expected Arrow type, for the message.
        expected: &'static str,
    },

    /// A required column contains a null.
    #[snafu(display("{kind} section column {column:?} has a null at row {row}"))]
    UnexpectedNull {
        /// Section kind being decoded.
        kind: SectionKind,
        /// Column name.
        column: String,
        /// Row index within its batch.
        row: usize,
    },

    /// A Logs section has no Streams section before it.
    #[snafu(display("Logs section {ordinal} is not preceded by a streams section"))]
    MissingStreamsSection {
        /// One-based ordinal of the orphaned Logs section.
        ordinal: u32,
    },

    /// Two rows of a Streams section share an ID.
    #[snafu(display("Duplicate stream ID {stream_id} in streams section"))]
    DuplicateStreamId {
        /// The repeated ID.
        stream_id: i64,
    },

    /// A timestamp cannot be represented as nanoseconds since the epoch.
    #[snafu(display("Timestamp {timestamp} is outside the nanosecond range"))]
    TimestampRange {
        /// The offending timestamp, RFC3339.
        timestamp: String,
    },

    /// `flush` was called without any log entries.
    #[snafu(display("Cannot flush an empty data object builder"))]
    EmptyBuilder,

    /// Invalid builder or uploader configuration.
    #[snafu(display("Invalid configuration: {source}"))]
    Config {
        /// Underlying validation error.
        source: ConfigError,
    },

    /// Cancellation or deadline while reading or uploading.
    #[snafu(display("{source}"))]
    Context {
        /// Underlying context error.
        source: ContextError,
    },

    /// Object storage failure.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(source, backtrace)]
        source: StorageError,
    },
}

impl DataObjError {
    /// True when the error was caused by cancellation or an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            DataObjError::Context {
                source: ContextError::Cancelled | ContextError::DeadlineExceeded
            }
        )
    }

    /// True when the object itself was missing from storage.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataObjError::Storage { source } if source.is_not_found())
    }
}
