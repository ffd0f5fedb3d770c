//! End-to-end CLI workflows against a temporary local object store.

use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

mod common;

use common::{cli, cli_in, store_root, write_records, write_sample};

const START: &str = "2024-01-01T00:00:00Z";
const END: &str = "2024-01-01T01:00:00Z";

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Ingest the sample file and return the printed object path.
fn ingest_sample(tmp: &TempDir) -> Result<String, Box<dyn std::error::Error>> {
    let input = tmp.path().join("sample.jsonl");
    write_sample(&input)?;

    let output = cli_in(tmp)
        .args(["ingest", "--input", input.to_string_lossy().as_ref()])
        .assert()
        .success()
        .stdout(contains("Indexed object tenant/fake/objects/"))
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output)?;
    let path = stdout
        .lines()
        .find_map(|l| l.strip_prefix("Indexed object "))
        .ok_or("no object path in output")?;
    Ok(path.trim().to_string())
}

#[test]
fn ingest_then_list_labels_and_values() -> TestResult {
    let tmp = TempDir::new()?;
    ingest_sample(&tmp)?;
    assert!(store_root(&tmp).join("tenant/fake/metastore").is_dir());

    cli_in(&tmp)
        .args(["labels", "--start", START, "--end", END])
        .assert()
        .success()
        .stdout("app\nenv\n");

    cli_in(&tmp)
        .args(["values", "--start", START, "--end", END, "-m", "app=api"])
        .assert()
        .success()
        .stdout("api\ndev\nprod\n");
    Ok(())
}

#[test]
fn streams_and_sections_prune_by_matchers() -> TestResult {
    let tmp = TempDir::new()?;
    let path = ingest_sample(&tmp)?;

    cli_in(&tmp)
        .args([
            "streams", "--start", START, "--end", END, "-m", "app=api", "-m", "env=prod",
        ])
        .assert()
        .success()
        .stdout(format!("{path} section=1 stream_ids=1\n"));

    cli_in(&tmp)
        .args([
            "sections", "--start", START, "--end", END, "-m", "app=api", "-p", "status=200",
        ])
        .assert()
        .success()
        .stdout(contains(format!("{path} section=1 rows=2")));

    cli_in(&tmp)
        .args(["sections", "--start", START, "--end", END])
        .assert()
        .success()
        .stdout("")
        .stderr(contains("No --matcher given"));
    Ok(())
}

#[test]
fn scan_prints_label_and_metadata_columns() -> TestResult {
    let tmp = TempDir::new()?;
    let path = ingest_sample(&tmp)?;

    cli_in(&tmp)
        .args(["scan", "--object", path.as_str()])
        .assert()
        .success()
        .stdout(contains("logs section 1 (4 rows)"))
        .stdout(contains("GET /orders"))
        .stdout(contains("2024-01-01T00:00:20"))
        .stdout(contains("status"));

    cli_in(&tmp)
        .args([
            "scan",
            "--object",
            path.as_str(),
            "--stream-id",
            "2",
            "--column",
            "label:app",
            "--column",
            "message",
        ])
        .assert()
        .success()
        .stdout(contains("logs section 1 (1 rows)"))
        .stdout(contains("slow query"))
        .stdout(contains("GET").not());
    Ok(())
}

#[test]
fn tenants_are_isolated() -> TestResult {
    let tmp = TempDir::new()?;
    ingest_sample(&tmp)?;

    cli_in(&tmp)
        .args(["--tenant", "other", "labels", "--start", START, "--end", END])
        .assert()
        .success()
        .stdout("");
    Ok(())
}

#[test]
fn metrics_flag_prints_counters_to_stderr() -> TestResult {
    let tmp = TempDir::new()?;
    let input = tmp.path().join("sample.jsonl");
    write_sample(&input)?;

    cli_in(&tmp)
        .args(["--metrics", "ingest", "--input", input.to_string_lossy().as_ref()])
        .assert()
        .success()
        .stderr(contains("dataobj_uploads_total 1"))
        .stderr(contains("dataobj_metastore_updates_total 1"))
        .stderr(contains("dataobj_metastore_commit_conflicts_total 0"));

    cli_in(&tmp)
        .args(["labels", "--start", START, "--end", END, "--metrics"])
        .assert()
        .success()
        .stdout("app\nenv\n")
        .stderr(contains(r#"dataobj_metastore_queries_total{operation="Labels"} 1"#))
        .stderr(contains("dataobj_metastore_objects_fetched_total 1"));

    cli_in(&tmp)
        .args(["labels", "--start", START, "--end", END])
        .assert()
        .success()
        .stderr(contains("# HELP").not());
    Ok(())
}

#[test]
fn config_file_overrides_defaults() -> TestResult {
    let tmp = TempDir::new()?;
    let config = tmp.path().join("config.json");
    std::fs::write(&config, r#"{"builder": {"max_section_rows": 1}}"#)?;
    let input = tmp.path().join("sample.jsonl");
    write_sample(&input)?;

    cli_in(&tmp)
        .args([
            "--config",
            config.to_string_lossy().as_ref(),
            "ingest",
            "--input",
            input.to_string_lossy().as_ref(),
        ])
        .assert()
        .success()
        .stdout(contains("logs sections: 4"));

    std::fs::write(&config, r#"{"metastore": {"fetch_concurrency": 0}}"#)?;
    cli_in(&tmp)
        .args([
            "--config",
            config.to_string_lossy().as_ref(),
            "labels",
            "--start",
            START,
            "--end",
            END,
        ])
        .assert()
        .failure()
        .stderr(contains("Invalid configuration"));
    Ok(())
}

#[test]
fn bad_inputs_fail_with_readable_errors() -> TestResult {
    let tmp = TempDir::new()?;
    let input = tmp.path().join("bad.jsonl");

    std::fs::write(&input, "{not json}\n")?;
    cli_in(&tmp)
        .args(["ingest", "--input", input.to_string_lossy().as_ref()])
        .assert()
        .failure()
        .stderr(contains("Line 1: not a valid log record"));

    write_records(&input, &[("app=api", 0, "x", &[])])?;
    cli_in(&tmp)
        .args(["ingest", "--input", input.to_string_lossy().as_ref()])
        .assert()
        .failure()
        .stderr(contains("Line 1: invalid labels"));

    std::fs::write(&input, "")?;
    cli_in(&tmp)
        .args(["ingest", "--input", input.to_string_lossy().as_ref()])
        .assert()
        .failure()
        .stderr(contains("holds no log records"));

    cli_in(&tmp)
        .args(["labels", "--start", END, "--end", START])
        .assert()
        .failure()
        .stderr(contains("Invalid time range"));

    cli_in(&tmp)
        .args(["scan", "--object", "tenant/fake/objects/00/missing"])
        .assert()
        .failure()
        .stderr(contains("Data object error"));
    Ok(())
}

#[test]
fn rejects_invalid_arguments() {
    cli()
        .args(["labels", "--start", "yesterday", "--end", END])
        .assert()
        .failure();

    cli()
        .args(["values", "--start", START, "--end", END, "-m", "app=~("])
        .assert()
        .failure()
        .stderr(contains("Invalid regex"));

    cli()
        .args(["--tenant", "a/b", "labels", "--start", START, "--end", END])
        .assert()
        .failure()
        .stderr(contains("Invalid --tenant"));
}
