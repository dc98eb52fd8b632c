//! E2E tests: command dispatch through `cli::execute`.

use std::path::Path;

use clap::Parser;
use pytest_chronicle::cli::{self, Cli};
use pytest_chronicle::db::revisions;
use pytest_chronicle::error::{AppError, AppResult};

use super::test_helpers::*;

async fn run_cli(db: &Path, args: &[&str]) -> (AppResult<u8>, String) {
    let url = format!("sqlite://{}", db.display());
    let mut argv = vec!["pytest-chronicle", "--database-url", url.as_str()];
    argv.extend_from_slice(args);

    let cli = Cli::try_parse_from(argv).expect("valid arguments");
    let mut out = Vec::new();
    let result = cli::execute(cli, &mut out).await;
    (result, String::from_utf8(out).expect("utf-8 output"))
}

#[tokio::test]
async fn test_ingest_then_latest_red() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("results.db");
    let summary = dir.path().join("summary.json");
    write_summary(
        &summary,
        "a1",
        "2025-09-01T10:00:00Z",
        &[("pkg/mod.py::test_failure", "failed"), ("pkg/mod.py::test_ok", "passed")],
    );
    let summary = summary.display().to_string();

    let (code, out) = run_cli(
        &db,
        &["ingest", "--summary", &summary, "--project", "proj-a", "--print-id"],
    )
    .await;
    assert_eq!(code.unwrap(), 0);
    let run_id = out.trim().to_string();
    assert_eq!(run_id.len(), 36);

    // Re-ingesting prints the same id
    let (code, out) = run_cli(
        &db,
        &["ingest", "--summary", &summary, "--project", "proj-a", "--print-id"],
    )
    .await;
    assert_eq!(code.unwrap(), 0);
    assert_eq!(out.trim(), run_id);

    let (code, out) = run_cli(&db, &["latest-red", "--project-like", "proj%"]).await;
    assert_eq!(code.unwrap(), 0);
    assert_eq!(out, "pkg/mod.py::test_failure\n");

    let (_, out) = run_cli(&db, &["latest-red", "--project", "proj-a", "--json"]).await;
    let row: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(row["nodeid"], "pkg/mod.py::test_failure");
    assert_eq!(row["run_id"], run_id.as_str());
    assert_eq!(row["status"], "failed");
}

#[tokio::test]
async fn test_ingest_rejects_malformed_cases() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("results.db");
    let summary = dir.path().join("summary.json");
    std::fs::write(
        &summary,
        r#"{"head_sha": "a1", "junit": {"cases": [
            {"nodeid": "t.py::ok", "status": "passed"},
            {"nodeid": "t.py::odd", "status": "exploded"}
        ]}}"#,
    )
    .unwrap();

    let (result, _) = run_cli(
        &db,
        &["ingest", "--summary", &summary.display().to_string(), "--project", "p"],
    )
    .await;
    assert!(matches!(result, Err(AppError::Parse(_))));
    assert!(!db.exists());
}

#[tokio::test]
async fn test_latest_red_on_fresh_store_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("nested/results.db");
    let (code, out) = run_cli(&db, &["latest-red"]).await;
    assert_eq!(code.unwrap(), 0);
    assert!(out.is_empty());

    let (code, out) = run_cli(&db, &["latest-red", "--mode", "latest-run", "--json"]).await;
    assert_eq!(code.unwrap(), 0);
    assert!(out.is_empty());

    // Reading must not leave a store behind
    assert!(!db.exists());
    assert!(!dir.path().join("nested").exists());
}

#[tokio::test]
async fn test_ingest_with_explicit_run_id() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("results.db");
    let summary = dir.path().join("summary.json");
    write_summary(&summary, "a1", "2025-09-01T10:00:00Z", &[("t.py::x", "failed")]);
    let summary = summary.display().to_string();

    let run_id = "0198F000-0000-7000-8000-0000000000AA";
    let (code, out) = run_cli(
        &db,
        &["ingest", "--summary", &summary, "--project", "proj-a", "--run-id", run_id, "--print-id"],
    )
    .await;
    assert_eq!(code.unwrap(), 0);
    assert_eq!(out.trim(), "0198f000-0000-7000-8000-0000000000aa");

    let (_, out) = run_cli(&db, &["latest-red", "--json"]).await;
    let row: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(row["run_id"], "0198f000-0000-7000-8000-0000000000aa");
}

#[tokio::test]
async fn test_ingest_rejects_malformed_run_id() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("results.db");
    let summary = dir.path().join("summary.json");
    write_summary(&summary, "a1", "2025-09-01T10:00:00Z", &[("t.py::x", "passed")]);
    let summary = summary.display().to_string();

    let (result, out) = run_cli(
        &db,
        &["ingest", "--summary", &summary, "--project", "proj-a", "--run-id", "run-42"],
    )
    .await;
    let err = result.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(out.is_empty());
    assert!(!db.exists());
}

#[tokio::test]
async fn test_backfill_dry_run_never_opens_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("results.db");
    write_summary(
        &dir.path().join("reports/one/summary.json"),
        "a1",
        "2025-09-01T10:00:00Z",
        &[("t.py::x", "failed")],
    );
    let pattern = format!("{}/reports/*/summary.json", dir.path().display());

    let (code, out) = run_cli(
        &db,
        &["backfill", "--glob", &pattern, "--dry-run", "--project", "proj-a"],
    )
    .await;

    assert_eq!(code.unwrap(), 0);
    assert!(out.starts_with("Found 1 file(s).\n"));
    assert!(out.contains("Would ingest:"));
    assert!(!db.exists());
}

#[tokio::test]
async fn test_backfill_failure_sets_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("results.db");
    write_summary(
        &dir.path().join("reports/good/summary.json"),
        "a1",
        "2025-09-01T10:00:00Z",
        &[("t.py::x", "passed")],
    );
    std::fs::create_dir_all(dir.path().join("reports/bad")).unwrap();
    std::fs::write(dir.path().join("reports/bad/summary.json"), "[]").unwrap();
    let pattern = format!("{}/reports/*/summary.json", dir.path().display());

    let (code, out) = run_cli(&db, &["backfill", "--glob", &pattern]).await;
    assert_eq!(code.unwrap(), 1);
    assert!(out.contains("Failed to ingest"));
    assert!(out.contains("ingested=1 skipped=0 failed=1"));
}

#[tokio::test]
async fn test_db_commands() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("results.db");
    let head = revisions::head().unwrap();

    let (_, out) = run_cli(&db, &["db", "current"]).await;
    assert_eq!(out, "<base>\n");

    let (_, out) = run_cli(&db, &["db", "upgrade"]).await;
    assert_eq!(out.trim(), head);

    let (_, out) = run_cli(&db, &["db", "current"]).await;
    assert_eq!(out.trim(), format!("{} (head)", head));

    let (_, out) = run_cli(&db, &["db", "history"]).await;
    assert_eq!(out.lines().count(), 2);
    assert!(out.lines().next().unwrap().ends_with("(head) (current)"));

    let (_, out) = run_cli(&db, &["db", "downgrade", "base"]).await;
    assert_eq!(out, "<base>\n");

    let (result, _) = run_cli(&db, &["db", "upgrade", "nope"]).await;
    assert_eq!(result.unwrap_err().exit_code(), 2);
}

#[tokio::test]
async fn test_export_and_import_commands() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("results.db");
    let summary = dir.path().join("summary.json");
    write_summary(&summary, "a1", "2025-09-01T10:00:00Z", &[("t.py::x", "failed")]);
    run_cli(&db, &["ingest", "--summary", &summary.display().to_string(), "--project", "p"])
        .await
        .0
        .unwrap();

    let snapshot = dir.path().join("snapshot.db").display().to_string();
    let (code, out) = run_cli(&db, &["export-sqlite", "--out", &snapshot]).await;
    assert_eq!(code.unwrap(), 0);
    assert!(out.starts_with("Exported 1 run(s) and 1 case(s)"));

    let restored = dir.path().join("restored.db");
    let (code, out) = run_cli(&restored, &["import-sqlite", "--sqlite", &snapshot]).await;
    assert_eq!(code.unwrap(), 0);
    assert_eq!(out, "Imported 1 run(s) and 1 case(s); skipped 0 existing run(s)\n");

    let (_, out) = run_cli(&restored, &["latest-red"]).await;
    assert_eq!(out, "t.py::x\n");
}
