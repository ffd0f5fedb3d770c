//! Columnar scan over one Streams section and one Logs section.
//!
//! A scan yields Arrow `RecordBatch`es whose rows are the log records of a
//! chosen set of streams, each row enriched with its stream's labels. Output
//! columns come from three namespaces:
//!
//! - **label** columns, taken from the stream the record belongs to;
//! - **metadata** columns, taken from the record's structured metadata;
//! - the **builtin** `timestamp` and `message` columns.
//!
//! The same name can exist as both a label and a metadata key. Such columns
//! are never merged: each namespace gets its own output field, tagged with
//! [`COLUMN_TYPE_KEY`] in the field metadata, and a row that has no value in
//! a namespace carries a null there.
//!
//! Column resolution happens once, before the first row is read, so the
//! schema is fixed for the whole scan. Rows are emitted in the Logs
//! section's stored order.

mod column;
mod dataobj_scan;
mod error;
mod resolve;

pub use column::{COLUMN_TYPE_KEY, ColumnNamespace, ColumnRef, OutputColumn};
pub use dataobj_scan::{DataObjScan, DataObjScanOptions, new_dataobj_scan};
pub use error::{ScanError, ScanResult};
pub use resolve::resolve_columns;
