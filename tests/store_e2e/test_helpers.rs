//! Shared test helpers for store E2E tests.

use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pytest_chronicle::config;
use pytest_chronicle::db::DbPool;
use pytest_chronicle::models::{CaseStatus, NewCase, NewRun, NormalizedRun};
use tempfile::TempDir;

/// Connect to a SQLite file inside `dir` without touching its schema.
pub async fn connect_in(dir: &Path, file: &str) -> DbPool {
    let url = config::normalize_database_url(&config::default_sqlite_url(&dir.join(file)))
        .expect("valid sqlite url");
    DbPool::connect(&url).await.expect("connect to sqlite store")
}

/// A fresh store at head. Keep the `TempDir` alive for the test's duration.
pub async fn create_test_store() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = connect_in(dir.path(), "test_results.db").await;
    pool.ensure_head().await.expect("migrate to head");
    (dir, pool)
}

/// Fixed instant plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 17, 12, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// A run with git identity filled in, so it gets a primary fingerprint.
pub fn run_of(
    project: &str,
    head_sha: &str,
    started_at: DateTime<Utc>,
    cases: &[(&str, CaseStatus)],
) -> NormalizedRun {
    let mut run = NewRun::new(project, started_at);
    run.started_at_from_source = true;
    run.suite = Some("pytest".to_string());
    run.head_sha = head_sha.to_string();
    run.code_hash = format!("code-{}", head_sha);
    run.branch = "main".to_string();
    run.gpu = "cpu".to_string();

    let cases = cases
        .iter()
        .map(|(nodeid, status)| {
            let message = status
                .is_red()
                .then(|| format!("AssertionError in {}", nodeid));
            NewCase::new(*nodeid, *status)
                .with_duration(0.25)
                .with_message(message)
        })
        .collect();

    NormalizedRun {
        run,
        cases,
        issues: Vec::new(),
    }
}

/// Write a minimal aggregated summary document.
pub fn write_summary(path: &Path, head_sha: &str, timestamp: &str, cases: &[(&str, &str)]) {
    let cases: Vec<_> = cases
        .iter()
        .map(|(nodeid, status)| serde_json::json!({ "nodeid": nodeid, "status": status, "time_sec": 0.1 }))
        .collect();
    let doc = serde_json::json!({
        "status": "ok",
        "timestamp": timestamp,
        "head_sha": head_sha,
        "code_hash_excluding_reports": format!("code-{}", head_sha),
        "gpu": "cpu",
        "junit": { "tests": cases.len(), "cases": cases },
    });
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create summary dir");
    }
    std::fs::write(path, doc.to_string()).expect("write summary");
}
