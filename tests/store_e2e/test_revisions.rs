//! E2E tests: schema revision management.

use pytest_chronicle::db::{RevisionRange, revisions};
use pytest_chronicle::error::AppError;
use pytest_chronicle::models::CaseStatus;
use sea_orm::ConnectionTrait;
use sea_orm_migration::prelude::SchemaManager;

use super::test_helpers::*;

const FIRST: &str = "m20250917_000001_create_test_runs_and_cases";

async fn has_table(pool: &pytest_chronicle::db::DbPool, table: &str) -> bool {
    SchemaManager::new(pool.connection())
        .has_table(table)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_fresh_store_is_at_base() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect_in(dir.path(), "fresh.db").await;

    assert_eq!(pool.current_revision().await.unwrap(), None);
    assert_eq!(pool.current_position().await.unwrap(), 0);
}

#[tokio::test]
async fn test_upgrade_downgrade_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect_in(dir.path(), "store.db").await;

    let at_head = pool.upgrade("head").await.unwrap();
    assert_eq!(at_head, revisions::head());
    assert!(has_table(&pool, "test_runs").await);
    assert!(has_table(&pool, "test_cases").await);

    let at_base = pool.downgrade("base").await.unwrap();
    assert_eq!(at_base, None);
    assert_eq!(pool.current_revision().await.unwrap(), None);
    assert!(!has_table(&pool, "test_runs").await);
    assert!(!has_table(&pool, "test_cases").await);

    pool.upgrade("head").await.unwrap();
    assert_eq!(pool.current_revision().await.unwrap(), revisions::head());

    // Schema is usable after the round trip
    pool.ingest(&run_of("proj-a", "a1", at(0), &[("t.py::x", CaseStatus::Passed)]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_step_by_step_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect_in(dir.path(), "store.db").await;

    assert_eq!(pool.upgrade(FIRST).await.unwrap().as_deref(), Some(FIRST));
    assert_eq!(pool.current_position().await.unwrap(), 1);

    pool.upgrade("head").await.unwrap();
    assert_eq!(pool.current_position().await.unwrap(), 2);

    pool.downgrade(FIRST).await.unwrap();
    assert_eq!(pool.current_revision().await.unwrap().as_deref(), Some(FIRST));
    assert!(has_table(&pool, "test_runs").await);
}

#[tokio::test]
async fn test_wrong_direction_is_a_conflict() {
    let (_dir, pool) = create_test_store().await;
    assert!(matches!(
        pool.upgrade(FIRST).await,
        Err(AppError::MigrationConflict(_))
    ));

    pool.downgrade("base").await.unwrap();
    assert!(matches!(
        pool.downgrade(FIRST).await,
        Err(AppError::MigrationConflict(_))
    ));
}

#[tokio::test]
async fn test_unknown_revision_is_invalid_input() {
    let (_dir, pool) = create_test_store().await;
    assert!(matches!(
        pool.upgrade("does-not-exist").await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        pool.stamp("does-not-exist").await,
        Err(AppError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_tables_without_marker_need_stamp() {
    let (_dir, pool) = create_test_store().await;
    pool.connection()
        .execute_unprepared("DELETE FROM chronicle_revision")
        .await
        .unwrap();

    assert!(matches!(
        pool.ensure_head().await,
        Err(AppError::MigrationConflict(_))
    ));

    pool.stamp("head").await.unwrap();
    pool.ensure_head().await.unwrap();
    assert_eq!(pool.current_revision().await.unwrap(), revisions::head());
}

#[tokio::test]
async fn test_unknown_marker_is_a_conflict() {
    let (_dir, pool) = create_test_store().await;
    pool.connection()
        .execute_unprepared("UPDATE chronicle_revision SET version_num = 'm29990101_000099_future'")
        .await
        .unwrap();

    assert!(matches!(
        pool.ensure_head().await,
        Err(AppError::MigrationConflict(_))
    ));
}

#[tokio::test]
async fn test_history_marks_head_and_current() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect_in(dir.path(), "store.db").await;
    pool.upgrade(FIRST).await.unwrap();

    let entries = pool.history(&RevisionRange::default()).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].is_head && !entries[0].is_current);
    assert!(entries[1].is_current && !entries[1].is_head);
    assert_eq!(entries[1].revision, FIRST);
}
