//! E2E tests: ingestion engine.

use pytest_chronicle::entity::{test_case, test_run};
use pytest_chronicle::error::AppError;
use pytest_chronicle::models::{CaseStatus, RedQuery};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use super::test_helpers::*;

#[tokio::test]
async fn test_ingest_stores_run_and_cases() {
    let (_dir, pool) = create_test_store().await;
    let normalized = run_of(
        "proj-a",
        "abc123",
        at(0),
        &[
            ("tests/test_a.py::test_ok", CaseStatus::Passed),
            ("tests/test_a.py::test_bad", CaseStatus::Failed),
            ("tests/test_a.py::test_skip", CaseStatus::Skipped),
        ],
    );

    let outcome = pool.ingest(&normalized).await.unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.cases, 3);

    let run = test_run::Entity::find_by_id(outcome.run_id.clone())
        .one(pool.connection())
        .await
        .unwrap()
        .expect("run stored");
    assert_eq!(run.project, "proj-a");
    assert_eq!(run.status, "failed");
    assert_eq!(run.tests, 3);
    assert_eq!(run.failures, 1);
    assert_eq!(run.skipped, 1);
    assert_eq!(run.passed, 1);
    assert_eq!(run.created_at, at(0));
    assert_eq!(run.run_key, outcome.fingerprint);

    let cases = test_case::Entity::find()
        .filter(test_case::Column::RunId.eq(outcome.run_id.as_str()))
        .order_by_asc(test_case::Column::Nodeid)
        .all(pool.connection())
        .await
        .unwrap();
    assert_eq!(cases.len(), 3);
    assert_eq!(cases[0].nodeid, "tests/test_a.py::test_bad");
    assert_eq!(cases[0].classname, "tests/test_a.py");
    assert_eq!(cases[0].name, "test_bad");
    assert_eq!(cases[0].status, "failed");
    assert_eq!(
        cases[0].message.as_deref(),
        Some("AssertionError in tests/test_a.py::test_bad")
    );
}

#[tokio::test]
async fn test_ingest_is_idempotent() {
    let (_dir, pool) = create_test_store().await;
    let normalized = run_of("proj-a", "abc123", at(0), &[("t.py::x", CaseStatus::Passed)]);

    let first = pool.ingest(&normalized).await.unwrap();
    let second = pool.ingest(&normalized).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.run_id, second.run_id);
    assert_eq!(first.fingerprint, second.fingerprint);

    let counts = pool.counts().await.unwrap();
    assert_eq!(counts.runs, 1);
    assert_eq!(counts.cases, 1);
}

#[tokio::test]
async fn test_different_outcomes_same_commit_are_distinct_runs() {
    let (_dir, pool) = create_test_store().await;
    let green = run_of("proj-a", "abc123", at(0), &[("t.py::x", CaseStatus::Passed)]);
    let red = run_of("proj-a", "abc123", at(5), &[("t.py::x", CaseStatus::Failed)]);

    let a = pool.ingest(&green).await.unwrap();
    let b = pool.ingest(&red).await.unwrap();

    assert!(a.created && b.created);
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(pool.counts().await.unwrap().runs, 2);
}

#[tokio::test]
async fn test_cpu_and_gpu_suites_at_one_commit_are_distinct_runs() {
    let (_dir, pool) = create_test_store().await;
    let cases = [("t.py::x", CaseStatus::Passed), ("t.py::gpu", CaseStatus::Failed)];
    let cpu = run_of("proj-a", "abc123", at(0), &cases);
    let mut gpu = run_of("proj-a", "abc123", at(0), &cases);
    gpu.run.suite = Some("pytest-gpu".to_string());
    gpu.run.gpu = "cuda".to_string();

    let a = pool.ingest(&cpu).await.unwrap();
    let b = pool.ingest(&gpu).await.unwrap();

    assert!(a.created);
    assert!(b.created);
    assert_ne!(a.run_id, b.run_id);
    assert_ne!(a.fingerprint, b.fingerprint);
    assert_eq!(pool.counts().await.unwrap().runs, 2);

    let query = RedQuery {
        suite: Some("pytest-gpu".to_string()),
        ..Default::default()
    };
    let red = pool.latest_red(&query).await.unwrap();
    assert_eq!(red.len(), 1);
    assert_eq!(red[0].run_id, b.run_id);
}

#[tokio::test]
async fn test_fixed_run_id_is_used() {
    let (_dir, pool) = create_test_store().await;
    let mut normalized = run_of("proj-a", "abc123", at(0), &[("t.py::x", CaseStatus::Passed)]);
    normalized.run.id = Some("0198f000-0000-7000-8000-00000000abcd".to_string());

    let outcome = pool.ingest(&normalized).await.unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.run_id, "0198f000-0000-7000-8000-00000000abcd");

    let mut clash = run_of("proj-a", "def456", at(5), &[("t.py::x", CaseStatus::Failed)]);
    clash.run.id = normalized.run.id.clone();
    let result = pool.ingest(&clash).await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));
    assert_eq!(pool.counts().await.unwrap().runs, 1);
}

#[tokio::test]
async fn test_explicit_run_key_overrides_fingerprint() {
    let (_dir, pool) = create_test_store().await;
    let mut first = run_of("proj-a", "abc123", at(0), &[("t.py::x", CaseStatus::Passed)]);
    let mut retry = run_of("proj-a", "def456", at(9), &[("t.py::x", CaseStatus::Failed)]);
    first.run.run_key = Some("ci-build-42".to_string());
    retry.run.run_key = Some("ci-build-42".to_string());

    let a = pool.ingest(&first).await.unwrap();
    let b = pool.ingest(&retry).await.unwrap();

    assert_eq!(a.fingerprint, "ci-build-42");
    assert!(!b.created);
    assert_eq!(a.run_id, b.run_id);
}

#[tokio::test]
async fn test_empty_run_is_rejected_without_writes() {
    let (_dir, pool) = create_test_store().await;
    let empty = run_of("proj-a", "abc123", at(0), &[]);

    let result = pool.ingest(&empty).await;
    assert!(matches!(result, Err(AppError::EmptyInput(_))));
    assert_eq!(pool.counts().await.unwrap().runs, 0);
}

#[tokio::test]
async fn test_concurrent_ingest_of_same_run() {
    let (_dir, pool) = create_test_store().await;
    let other = pool.clone();
    let normalized = run_of(
        "proj-a",
        "abc123",
        at(0),
        &[("t.py::x", CaseStatus::Passed), ("t.py::y", CaseStatus::Error)],
    );

    let (a, b) = tokio::join!(pool.ingest(&normalized), other.ingest(&normalized));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.run_id, b.run_id);
    assert!(a.created ^ b.created);

    let counts = pool.counts().await.unwrap();
    assert_eq!(counts.runs, 1);
    assert_eq!(counts.cases, 2);
}

#[tokio::test]
async fn test_large_run_is_stored_in_batches() {
    let (_dir, pool) = create_test_store().await;
    let nodeids: Vec<String> = (0..300).map(|i| format!("t.py::test_{:03}", i)).collect();
    let cases: Vec<_> = nodeids
        .iter()
        .map(|n| (n.as_str(), CaseStatus::Passed))
        .collect();

    let outcome = pool
        .ingest(&run_of("proj-a", "abc123", at(0), &cases))
        .await
        .unwrap();

    assert_eq!(outcome.cases, 300);
    assert_eq!(pool.counts().await.unwrap().cases, 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_run_from_two_store_handles() {
    let dir = tempfile::tempdir().unwrap();
    let first = connect_in(dir.path(), "shared.db").await;
    first.ensure_head().await.unwrap();
    let second = connect_in(dir.path(), "shared.db").await;

    for round in 0..5 {
        let normalized = run_of(
            "proj-a",
            &format!("sha{}", round),
            at(round),
            &[("t.py::x", CaseStatus::Passed), ("t.py::y", CaseStatus::Failed)],
        );
        let (a, b) = tokio::join!(
            tokio::spawn({
                let pool = first.clone();
                let normalized = normalized.clone();
                async move { pool.ingest(&normalized).await }
            }),
            tokio::spawn({
                let pool = second.clone();
                let normalized = normalized.clone();
                async move { pool.ingest(&normalized).await }
            }),
        );
        let a = a.unwrap().expect("first handle ingests");
        let b = b.unwrap().expect("second handle ingests");

        assert_eq!(a.run_id, b.run_id);
        assert!(a.created ^ b.created, "round {}: exactly one insert", round);
    }

    let counts = first.counts().await.unwrap();
    assert_eq!(counts.runs, 5);
    assert_eq!(counts.cases, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_different_runs_from_two_store_handles() {
    let dir = tempfile::tempdir().unwrap();
    let first = connect_in(dir.path(), "shared.db").await;
    first.ensure_head().await.unwrap();
    let second = connect_in(dir.path(), "shared.db").await;

    for round in 0..5 {
        let left = run_of("proj-a", &format!("a{}", round), at(round), &[("t.py::x", CaseStatus::Passed)]);
        let right = run_of("proj-b", &format!("b{}", round), at(round), &[("t.py::x", CaseStatus::Failed)]);
        let (a, b) = tokio::join!(
            tokio::spawn({
                let pool = first.clone();
                async move { pool.ingest(&left).await }
            }),
            tokio::spawn({
                let pool = second.clone();
                async move { pool.ingest(&right).await }
            }),
        );
        let a = a.unwrap().expect("first handle ingests");
        let b = b.unwrap().expect("second handle ingests");

        assert!(a.created && b.created);
        assert_ne!(a.run_id, b.run_id);
    }

    assert_eq!(second.counts().await.unwrap().runs, 10);
}
