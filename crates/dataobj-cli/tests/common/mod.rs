use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("dobj"))
}

/// `dobj` with `--store` pointing inside `tmp`.
pub fn cli_in(tmp: &TempDir) -> Command {
    let mut cmd = cli();
    cmd.arg("--store").arg(store_root(tmp));
    cmd
}

pub fn store_root(tmp: &TempDir) -> PathBuf {
    tmp.path().join("store")
}

/// Write JSON-lines input with one record per `(labels, secs, line, metadata)`.
pub fn write_records(
    path: &Path,
    records: &[(&str, i64, &str, &[(&str, &str)])],
) -> TestResult {
    let mut out = String::new();
    for (labels, secs, line, metadata) in records {
        let ts = chrono::DateTime::from_timestamp(*secs, 0).ok_or("timestamp out of range")?;
        let metadata: serde_json::Map<String, serde_json::Value> = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect();
        let record = serde_json::json!({
            "labels": labels,
            "timestamp": ts.to_rfc3339(),
            "line": line,
            "metadata": metadata,
        });
        out.push_str(&record.to_string());
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Sample traffic from two services, 2024-01-01T00:00:00Z onwards.
pub fn write_sample(path: &Path) -> TestResult {
    const BASE: i64 = 1_704_067_200;
    write_records(
        path,
        &[
            (r#"{app="api", env="prod"}"#, BASE + 10, "GET /users", &[("status", "200")]),
            (r#"{app="api", env="prod"}"#, BASE + 20, "GET /orders", &[("status", "500")]),
            (r#"{app="db", env="prod"}"#, BASE + 30, "slow query", &[]),
            (r#"{app="api", env="dev"}"#, BASE + 40, "GET /health", &[("status", "200")]),
        ],
    )
}
