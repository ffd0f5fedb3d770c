//! Projection resolution against a pair of opened sections.

use std::collections::HashSet;

use crate::{
    dataobj::{LogsSection, MESSAGE, StreamsSection, TIMESTAMP},
    scan::column::{ColumnNamespace, ColumnRef, OutputColumn, is_builtin_name},
};

/// Resolve `projection` into the ordered output columns of a scan.
///
/// - An empty projection selects everything: label columns sorted by name,
///   then metadata columns sorted by name, then `timestamp` and `message`.
/// - A qualified reference yields exactly that column, even when the
///   section has no such label or key (the column is then all null).
/// - A bare builtin name yields the builtin column.
/// - Any other bare name yields its label column, then its metadata column,
///   for whichever of the two exist. A bare name found nowhere yields
///   nothing.
///
/// A column already produced by an earlier reference is not repeated.
pub fn resolve_columns(
    projection: &[ColumnRef],
    streams: &StreamsSection,
    logs: &LogsSection,
) -> Vec<OutputColumn> {
    if projection.is_empty() {
        return all_columns(streams, logs);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |column: OutputColumn| {
        if seen.insert(column.clone()) {
            out.push(column);
        }
    };

    for column in projection {
        match column {
            ColumnRef::Qualified(ns, name) => push(OutputColumn::new(*ns, name.as_str())),
            ColumnRef::Bare(name) if is_builtin_name(name) => {
                push(OutputColumn::new(ColumnNamespace::Builtin, name.as_str()))
            }
            ColumnRef::Bare(name) => {
                if streams.label_names().contains(name) {
                    push(OutputColumn::new(ColumnNamespace::Label, name.as_str()));
                }
                if logs.has_metadata_key(name) {
                    push(OutputColumn::new(ColumnNamespace::Metadata, name.as_str()));
                }
            }
        }
    }
    out
}

fn all_columns(streams: &StreamsSection, logs: &LogsSection) -> Vec<OutputColumn> {
    let labels = streams
        .label_names()
        .iter()
        .map(|name| OutputColumn::new(ColumnNamespace::Label, name.as_str()));
    let metadata = logs
        .metadata_keys()
        .iter()
        .map(|key| OutputColumn::new(ColumnNamespace::Metadata, key.as_str()));
    let builtins = [TIMESTAMP, MESSAGE]
        .into_iter()
        .map(|name| OutputColumn::new(ColumnNamespace::Builtin, name));

    labels.chain(metadata).chain(builtins).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataobj::{DataObject, LogStream, SectionKind},
        test_util::{build_object, ctx, entry, labels},
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn open_sections() -> Result<(StreamsSection, LogsSection), Box<dyn std::error::Error>> {
        let obj = DataObject::from_bytes(build_object(vec![
            LogStream {
                labels: labels(r#"{service="loki", env="prod", pod="pod-1"}"#),
                entries: vec![entry(1, "message 1", &[("pod", "override")])],
            },
            LogStream {
                labels: labels(r#"{service="loki", env="prod"}"#),
                entries: vec![entry(2, "message 2", &[("namespace", "namespace-1")])],
            },
        ]))?;
        let streams = obj.section(SectionKind::Streams, 1).ok_or("streams")?;
        let logs = obj.section(SectionKind::Logs, 1).ok_or("logs")?;
        Ok((
            StreamsSection::open(&ctx(), streams)?,
            LogsSection::open(&ctx(), logs)?,
        ))
    }

    fn names(columns: &[OutputColumn]) -> Vec<String> {
        columns.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn empty_projection_selects_every_namespace() -> TestResult {
        let (streams, logs) = open_sections()?;
        let columns = resolve_columns(&[], &streams, &logs);
        assert_eq!(
            names(&columns),
            [
                "label:env",
                "label:pod",
                "label:service",
                "metadata:namespace",
                "metadata:pod",
                "builtin:timestamp",
                "builtin:message",
            ]
        );
        Ok(())
    }

    #[test]
    fn bare_names_expand_to_each_namespace_holding_them() -> TestResult {
        let (streams, logs) = open_sections()?;
        let columns = resolve_columns(
            &[
                ColumnRef::bare("pod"),
                ColumnRef::bare("env"),
                ColumnRef::bare("namespace"),
                ColumnRef::bare("absent"),
            ],
            &streams,
            &logs,
        );
        assert_eq!(
            names(&columns),
            ["label:pod", "metadata:pod", "label:env", "metadata:namespace"]
        );
        Ok(())
    }

    #[test]
    fn qualified_and_builtin_references() -> TestResult {
        let (streams, logs) = open_sections()?;
        let columns = resolve_columns(
            &[
                ColumnRef::bare("timestamp"),
                ColumnRef::metadata("absent"),
                ColumnRef::label("pod"),
                ColumnRef::bare("pod"),
                ColumnRef::timestamp(),
            ],
            &streams,
            &logs,
        );
        assert_eq!(
            names(&columns),
            [
                "builtin:timestamp",
                "metadata:absent",
                "label:pod",
                "metadata:pod",
            ]
        );
        Ok(())
    }
}
