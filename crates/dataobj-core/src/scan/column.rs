//! Column references and resolved output columns.

use std::{collections::HashMap, fmt, str::FromStr};

use arrow::datatypes::{DataType, Field};
use snafu::prelude::*;

use crate::{
    dataobj::{MESSAGE, TIMESTAMP, timestamp_type},
    scan::error::{InvalidColumnSnafu, ScanError},
};

/// Field-metadata key carrying the [`ColumnNamespace`] of an output column.
pub const COLUMN_TYPE_KEY: &str = "column_type";

/// Namespace an output column is drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnNamespace {
    /// Fixed per-record columns: `timestamp` and `message`.
    Builtin,
    /// Stream labels.
    Label,
    /// Per-record structured metadata.
    Metadata,
}

impl ColumnNamespace {
    /// Lowercase name, as used in qualified references and field metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnNamespace::Builtin => "builtin",
            ColumnNamespace::Label => "label",
            ColumnNamespace::Metadata => "metadata",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "builtin" => Some(ColumnNamespace::Builtin),
            "label" => Some(ColumnNamespace::Label),
            "metadata" => Some(ColumnNamespace::Metadata),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names reserved for builtin columns.
pub(crate) fn is_builtin_name(name: &str) -> bool {
    name == TIMESTAMP || name == MESSAGE
}

/// A requested column.
///
/// A bare reference resolves to every namespace that holds the name (label
/// before metadata); builtin names always resolve to the builtin column.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnRef {
    /// A name whose namespace is not known to the caller.
    Bare(String),
    /// A name in exactly one namespace.
    Qualified(ColumnNamespace, String),
}

impl ColumnRef {
    /// Bare reference to `name`.
    pub fn bare(name: impl Into<String>) -> Self {
        ColumnRef::Bare(name.into())
    }

    /// The label `name`.
    pub fn label(name: impl Into<String>) -> Self {
        ColumnRef::Qualified(ColumnNamespace::Label, name.into())
    }

    /// The structured-metadata key `name`.
    pub fn metadata(name: impl Into<String>) -> Self {
        ColumnRef::Qualified(ColumnNamespace::Metadata, name.into())
    }

    /// The builtin `timestamp` column.
    pub fn timestamp() -> Self {
        ColumnRef::Qualified(ColumnNamespace::Builtin, TIMESTAMP.to_string())
    }

    /// The builtin `message` column.
    pub fn message() -> Self {
        ColumnRef::Qualified(ColumnNamespace::Builtin, MESSAGE.to_string())
    }

    /// Referenced name, without namespace.
    pub fn name(&self) -> &str {
        match self {
            ColumnRef::Bare(name) | ColumnRef::Qualified(_, name) => name,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Bare(name) => f.write_str(name),
            ColumnRef::Qualified(ns, name) => write!(f, "{ns}:{name}"),
        }
    }
}

impl FromStr for ColumnRef {
    type Err = ScanError;

    /// Parse `label:pod`, `metadata:pod`, `builtin:timestamp` or a bare `pod`.
    /// A prefix that is not a namespace is part of a bare name.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let qualified = input
            .split_once(':')
            .and_then(|(ns, name)| ColumnNamespace::parse(ns).map(|ns| (ns, name)));

        let column = match qualified {
            Some((ns, name)) => ColumnRef::Qualified(ns, name.to_string()),
            None => ColumnRef::Bare(input.to_string()),
        };
        ensure!(
            !column.name().is_empty(),
            InvalidColumnSnafu {
                input,
                reason: "empty column name",
            }
        );
        if let ColumnRef::Qualified(ColumnNamespace::Builtin, name) = &column {
            ensure!(
                is_builtin_name(name),
                InvalidColumnSnafu {
                    input,
                    reason: format!("builtin columns are {TIMESTAMP} and {MESSAGE}"),
                }
            );
        }
        Ok(column)
    }
}

/// One column of a scan's output schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutputColumn {
    /// Namespace the values come from.
    pub namespace: ColumnNamespace,
    /// Column name, without namespace.
    pub name: String,
}

impl OutputColumn {
    pub(crate) fn new(namespace: ColumnNamespace, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// True for the builtin timestamp column.
    pub(crate) fn is_timestamp(&self) -> bool {
        self.namespace == ColumnNamespace::Builtin && self.name == TIMESTAMP
    }

    /// Nullable Arrow field tagged with the column's namespace.
    pub fn field(&self) -> Field {
        let data_type = if self.is_timestamp() {
            timestamp_type()
        } else {
            DataType::Utf8
        };
        Field::new(&self.name, data_type, true).with_metadata(HashMap::from([(
            COLUMN_TYPE_KEY.to_string(),
            self.namespace.as_str().to_string(),
        )]))
    }
}

impl fmt::Display for OutputColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}
