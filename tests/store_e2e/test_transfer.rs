//! E2E tests: portable SQLite export and import.

use pytest_chronicle::db::revisions;
use pytest_chronicle::entity::{test_case, test_run};
use pytest_chronicle::error::AppError;
use pytest_chronicle::models::CaseStatus;
use sea_orm::{EntityTrait, QueryOrder};

use super::test_helpers::*;

async fn snapshot(pool: &pytest_chronicle::db::DbPool) -> (Vec<test_run::Model>, Vec<test_case::Model>) {
    let runs = test_run::Entity::find()
        .order_by_asc(test_run::Column::Id)
        .all(pool.connection())
        .await
        .unwrap();
    let cases = test_case::Entity::find()
        .order_by_asc(test_case::Column::Id)
        .all(pool.connection())
        .await
        .unwrap();
    (runs, cases)
}

async fn seeded_store() -> (tempfile::TempDir, pytest_chronicle::db::DbPool) {
    let (dir, pool) = create_test_store().await;
    let mut first = run_of(
        "proj-a",
        "a1",
        at(0),
        &[("t.py::x", CaseStatus::Failed), ("t.py::y", CaseStatus::Passed)],
    );
    first.run.env.insert("PYTHON".to_string(), serde_json::json!("3.12"));
    first.run.ci.insert("GITHUB_RUN_ID".to_string(), "99".to_string());
    pool.ingest(&first).await.unwrap();
    pool.ingest(&run_of("proj-b", "b1", at(5), &[("u.py::z", CaseStatus::Error)]))
        .await
        .unwrap();
    (dir, pool)
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let (dir, source) = seeded_store().await;
    let out = dir.path().join("snapshot.db");

    let exported = source.export_sqlite(&out).await.unwrap();
    assert_eq!((exported.runs, exported.cases), (2, 3));
    assert_eq!(exported.revision, revisions::head());

    let target = connect_in(dir.path(), "restored.db").await;
    let imported = target.import_sqlite(&out).await.unwrap();
    assert_eq!((imported.runs, imported.cases, imported.skipped_runs), (2, 3, 0));

    assert_eq!(snapshot(&source).await, snapshot(&target).await);
    assert_eq!(target.current_revision().await.unwrap(), revisions::head());
}

#[tokio::test]
async fn test_import_skips_runs_already_present() {
    let (dir, source) = seeded_store().await;
    let out = dir.path().join("snapshot.db");
    source.export_sqlite(&out).await.unwrap();

    let target = connect_in(dir.path(), "restored.db").await;
    target.import_sqlite(&out).await.unwrap();
    let again = target.import_sqlite(&out).await.unwrap();

    assert_eq!((again.runs, again.cases, again.skipped_runs), (0, 0, 2));
    assert_eq!(target.counts().await.unwrap().runs, 2);
}

#[tokio::test]
async fn test_export_refuses_existing_destination() {
    let (dir, source) = seeded_store().await;
    let out = dir.path().join("snapshot.db");
    std::fs::write(&out, b"keep me").unwrap();

    let result = source.export_sqlite(&out).await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));
    assert_eq!(std::fs::read(&out).unwrap(), b"keep me");
}

#[tokio::test]
async fn test_import_rejects_snapshot_behind_head() {
    let dir = tempfile::tempdir().unwrap();
    let old = connect_in(dir.path(), "old.db").await;
    old.upgrade("m20250917_000001").await.unwrap();
    old.close().await.unwrap();

    let target = connect_in(dir.path(), "target.db").await;
    let result = target.import_sqlite(&dir.path().join("old.db")).await;
    assert!(matches!(result, Err(AppError::MigrationConflict(_))));
}

#[tokio::test]
async fn test_import_missing_snapshot() {
    let (dir, target) = create_test_store().await;
    let result = target.import_sqlite(&dir.path().join("nope.db")).await;
    assert!(matches!(result, Err(AppError::FileSystem(_))));
}
