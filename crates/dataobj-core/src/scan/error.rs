//! Error types for the `scan` module.

use arrow::error::ArrowError;
use snafu::{Backtrace, prelude::*};

use crate::{context::ContextError, dataobj::DataObjError};

/// Result alias for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors produced while resolving columns or producing scan batches.
///
/// Any error ends the scan; batches yielded before it remain valid.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ScanError {
    /// A batch size of zero was requested.
    #[snafu(display("Scan batch size must be greater than zero"))]
    InvalidBatchSize,

    /// A column reference could not be parsed.
    #[snafu(display("Invalid column reference {input:?}: {reason}"))]
    InvalidColumn {
        /// The text that failed to parse.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The Logs section could not be decoded.
    #[snafu(display("Failed to read logs section: {source}"))]
    DataObject {
        /// Underlying data object error.
        #[snafu(source, backtrace)]
        source: DataObjError,
    },

    /// Assembling an output batch failed.
    #[snafu(display("Failed to assemble scan batch: {source}"))]
    Arrow {
        /// Underlying arrow error.
        source: ArrowError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The query was cancelled or its deadline passed.
    #[snafu(display("{source}"))]
    Context {
        /// Underlying context error.
        source: ContextError,
    },
}

impl ScanError {
    /// True when the scan stopped because of cancellation or an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        match self {
            ScanError::Context { source } => {
                matches!(source, ContextError::Cancelled | ContextError::DeadlineExceeded)
            }
            ScanError::DataObject { source } => source.is_cancellation(),
            _ => false,
        }
    }
}
