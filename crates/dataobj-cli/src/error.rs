use std::path::PathBuf;

use dataobj_core::{
    config::ConfigError, context::ContextError, dataobj::DataObjError, labels::LabelError,
    metastore::MetastoreError, scan::ScanError, storage::StorageError,
};
use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to read config file {}", path.display()))]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Config file {} is not valid JSON: {source}", path.display()))]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Invalid configuration: {source}"))]
    InvalidConfig { source: ConfigError },

    #[snafu(display("Invalid --tenant: {source}"))]
    Tenant { source: ContextError },

    #[snafu(display(
        "Cannot open object store at {}. Ensure the directory is writable.",
        path.display()
    ))]
    OpenStore {
        path: PathBuf,
        source: StorageError,
    },

    #[snafu(display("Failed to read input file {}", path.display()))]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Line {line}: not a valid log record: {source}"))]
    ParseRecord {
        line: usize,
        source: serde_json::Error,
    },

    #[snafu(display("Line {line}: invalid labels: {source}"))]
    RecordLabels { line: usize, source: LabelError },

    #[snafu(display("Line {line}: invalid timestamp {value:?}: {source}"))]
    RecordTimestamp {
        line: usize,
        value: String,
        source: chrono::ParseError,
    },

    #[snafu(display("Input file {} holds no log records", path.display()))]
    EmptyInput { path: PathBuf },

    #[snafu(display("Data object error: {source}"))]
    DataObject {
        #[snafu(source(from(DataObjError, Box::new)))]
        source: Box<DataObjError>,
    },

    #[snafu(display("Metastore error: {source}"))]
    Metastore {
        #[snafu(source(from(MetastoreError, Box::new)))]
        source: Box<MetastoreError>,
    },

    #[snafu(display("Scan failed: {source}"))]
    Scan {
        #[snafu(source(from(ScanError, Box::new)))]
        source: Box<ScanError>,
    },

    #[snafu(display("Failed to render batches: {source}"))]
    Render { source: arrow::error::ArrowError },

    #[snafu(display("Failed to encode metrics"))]
    EncodeMetrics { source: std::fmt::Error },
}
