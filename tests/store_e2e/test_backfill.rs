//! E2E tests: backfill orchestrator.

use pytest_chronicle::models::{ProjectFilter, RedQuery};
use pytest_chronicle::services::backfill::{self, BackfillOptions, FileOutcome};
use pytest_chronicle::services::RunContext;

use super::test_helpers::*;

fn options(dry_run: bool) -> BackfillOptions {
    BackfillOptions {
        dry_run,
        context: RunContext {
            project: Some("proj-a".to_string()),
            ..Default::default()
        },
    }
}

fn seed_reports(root: &std::path::Path) -> String {
    write_summary(
        &root.join("reports/2025-09-01/summary.json"),
        "a1",
        "2025-09-01T10:00:00Z",
        &[("t.py::x", "failed"), ("t.py::y", "passed")],
    );
    write_summary(
        &root.join("reports/2025-09-02/summary.json"),
        "a2",
        "2025-09-02T10:00:00Z",
        &[("t.py::x", "passed"), ("t.py::y", "error")],
    );
    format!("{}/reports/*/summary.json", root.display())
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let (dir, pool) = create_test_store().await;
    let pattern = seed_reports(dir.path());
    let files = backfill::discover(&[pattern]).unwrap();
    assert_eq!(files.len(), 2);

    let report = backfill::run(&pool, &files, &options(true)).await;
    assert!(report.dry_run);
    assert_eq!(report.planned(), 2);
    assert_eq!(report.files[0].1, FileOutcome::Planned { cases: 2 });

    let counts = pool.counts().await.unwrap();
    assert_eq!((counts.runs, counts.cases), (0, 0));
}

#[tokio::test]
async fn test_backfill_then_rerun_skips() {
    let (dir, pool) = create_test_store().await;
    let files = backfill::discover(&[seed_reports(dir.path())]).unwrap();

    let first = backfill::run(&pool, &files, &options(false)).await;
    assert_eq!(first.ingested(), 2);
    assert!(!first.has_failures());

    let second = backfill::run(&pool, &files, &options(false)).await;
    assert_eq!(second.ingested(), 0);
    assert_eq!(second.skipped(), 2);

    let counts = pool.counts().await.unwrap();
    assert_eq!((counts.runs, counts.cases), (2, 4));

    // The later summary decides what is red
    let red = pool
        .latest_red(&RedQuery {
            project: ProjectFilter::Exact("proj-a".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let nodeids: Vec<_> = red.iter().map(|c| c.nodeid.as_str()).collect();
    assert_eq!(nodeids, vec!["t.py::y"]);
}

#[tokio::test]
async fn test_bad_file_does_not_stop_backfill() {
    let (dir, pool) = create_test_store().await;
    let pattern = seed_reports(dir.path());
    let broken = dir.path().join("reports/2025-09-01b/summary.json");
    std::fs::create_dir_all(broken.parent().unwrap()).unwrap();
    std::fs::write(&broken, "{ truncated").unwrap();

    let files = backfill::discover(&[pattern]).unwrap();
    assert_eq!(files.len(), 3);

    let report = backfill::run(&pool, &files, &options(false)).await;
    assert_eq!(report.ingested(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.has_failures());
    assert!(matches!(report.files[1].1, FileOutcome::Failed { .. }));
    assert_eq!(pool.counts().await.unwrap().runs, 2);
}
