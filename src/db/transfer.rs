//! Portable transfer: SQLite snapshots of a whole store.
//!
//! Export copies runs, commits, then copies cases, so an interrupted export never
//! holds cases without their run. Import replays a snapshot inside one transaction,
//! keeping run and case ids as they were.

use std::collections::HashSet;
use std::path::Path;

use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use tracing::{info, warn};

use crate::config;
use crate::entity::{test_case, test_run};
use crate::error::{AppError, AppResult};

use super::DbPool;
use super::revisions;

/// Rows per page when streaming cases.
const CASE_PAGE: u64 = 500;

/// Rows per multi-row insert.
const INSERT_BATCH: usize = 64;

/// Outcome of an export or import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub runs: u64,
    pub cases: u64,
    /// Runs left out because their fingerprint already existed in the target
    pub skipped_runs: u64,
    pub revision: Option<String>,
}

fn run_active(model: &test_run::Model) -> test_run::ActiveModel {
    test_run::ActiveModel {
        id: Set(model.id.clone()),
        created_at: Set(model.created_at),
        project: Set(model.project.clone()),
        suite: Set(model.suite.clone()),
        status: Set(model.status.clone()),
        head_sha: Set(model.head_sha.clone()),
        code_hash: Set(model.code_hash.clone()),
        branch: Set(model.branch.clone()),
        parent_sha: Set(model.parent_sha.clone()),
        origin_url: Set(model.origin_url.clone()),
        describe: Set(model.describe.clone()),
        commit_timestamp: Set(model.commit_timestamp.clone()),
        is_dirty: Set(model.is_dirty),
        gpu: Set(model.gpu.clone()),
        marks: Set(model.marks.clone()),
        pytest_args: Set(model.pytest_args.clone()),
        platform: Set(model.platform.clone()),
        host: Set(model.host.clone()),
        tests: Set(model.tests),
        failures: Set(model.failures),
        errors: Set(model.errors),
        skipped: Set(model.skipped),
        passed: Set(model.passed),
        time_sec: Set(model.time_sec),
        env: Set(model.env.clone()),
        ci: Set(model.ci.clone()),
        report_dir: Set(model.report_dir.clone()),
        run_key: Set(model.run_key.clone()),
    }
}

fn case_active(model: &test_case::Model) -> test_case::ActiveModel {
    test_case::ActiveModel {
        id: Set(model.id),
        run_id: Set(model.run_id.clone()),
        nodeid: Set(model.nodeid.clone()),
        classname: Set(model.classname.clone()),
        name: Set(model.name.clone()),
        status: Set(model.status.clone()),
        time_sec: Set(model.time_sec),
        message: Set(model.message.clone()),
        detail: Set(model.detail.clone()),
        stdout_text: Set(model.stdout_text.clone()),
        stderr_text: Set(model.stderr_text.clone()),
        phases: Set(model.phases.clone()),
    }
}

async fn insert_runs<C: ConnectionTrait>(conn: &C, runs: &[test_run::Model]) -> AppResult<()> {
    for chunk in runs.chunks(INSERT_BATCH) {
        test_run::Entity::insert_many(chunk.iter().map(run_active))
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to copy runs: {}", e)))?;
    }
    Ok(())
}

async fn insert_cases<C: ConnectionTrait>(conn: &C, cases: &[test_case::Model]) -> AppResult<()> {
    for chunk in cases.chunks(INSERT_BATCH) {
        test_case::Entity::insert_many(chunk.iter().map(case_active))
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to copy cases: {}", e)))?;
    }
    Ok(())
}

/// Page through the source's cases by id, keeping those whose run is in `run_ids`,
/// and hand each page to `sink`.
async fn copy_cases<C, F, Fut>(source: &C, run_ids: &HashSet<String>, mut sink: F) -> AppResult<u64>
where
    C: ConnectionTrait,
    F: FnMut(Vec<test_case::Model>) -> Fut,
    Fut: std::future::Future<Output = AppResult<()>>,
{
    let mut last_id = i64::MIN;
    let mut copied = 0u64;

    loop {
        let page = test_case::Entity::find()
            .filter(test_case::Column::Id.gt(last_id))
            .order_by_asc(test_case::Column::Id)
            .limit(CASE_PAGE)
            .all(source)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to read cases: {}", e)))?;

        let Some(last) = page.last() else {
            break;
        };
        last_id = last.id;

        let keep: Vec<_> = page
            .into_iter()
            .filter(|case| run_ids.contains(&case.run_id))
            .collect();
        copied += keep.len() as u64;
        if !keep.is_empty() {
            sink(keep).await?;
        }
    }

    Ok(copied)
}

impl DbPool {
    /// Copy the whole store into a new SQLite file at `dest`.
    pub async fn export_sqlite(&self, dest: &Path) -> AppResult<TransferSummary> {
        if dest.exists() {
            return Err(AppError::InvalidInput(format!(
                "{} already exists; refusing to overwrite",
                dest.display()
            )));
        }

        let position = self.current_position().await?;
        let Some(revision) = revisions::revision_at(position) else {
            return Err(AppError::MigrationConflict(
                "Source store has no schema to export".to_string(),
            ));
        };

        let url = config::normalize_database_url(&config::default_sqlite_url(dest))?;
        let target = DbPool::connect(&url).await?;
        target.upgrade(&revision).await?;

        let runs = test_run::Entity::find()
            .order_by_asc(test_run::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to read runs: {}", e)))?;
        let run_ids: HashSet<String> = runs.iter().map(|run| run.id.clone()).collect();

        let txn = target.connection().begin().await?;
        insert_runs(&txn, &runs).await?;
        txn.commit().await?;

        let txn = target.connection().begin().await?;
        let cases = copy_cases(self.connection(), &run_ids, |page| {
            let txn = &txn;
            async move { insert_cases(txn, &page).await }
        })
        .await?;
        txn.commit().await?;
        target.close().await?;

        info!(runs = runs.len(), cases, revision = %revision, dest = %dest.display(), "Exported store");
        Ok(TransferSummary {
            runs: runs.len() as u64,
            cases,
            skipped_runs: 0,
            revision: Some(revision),
        })
    }

    /// Replay a SQLite snapshot into this store, preserving ids.
    pub async fn import_sqlite(&self, snapshot: &Path) -> AppResult<TransferSummary> {
        if !snapshot.is_file() {
            return Err(AppError::FileSystem(format!(
                "Snapshot {} not found",
                snapshot.display()
            )));
        }

        let url = format!("{}?mode=ro", config::default_sqlite_url(snapshot));
        let source = DbPool::connect(&url).await?;

        let head = revisions::head();
        let snapshot_revision = source.current_revision().await?;
        if snapshot_revision != head {
            return Err(AppError::MigrationConflict(format!(
                "Snapshot is at revision {}, expected {}",
                snapshot_revision.as_deref().unwrap_or("<none>"),
                head.as_deref().unwrap_or("<base>")
            )));
        }

        self.ensure_head().await?;

        let existing_keys: HashSet<String> = test_run::Entity::find()
            .select_only()
            .column(test_run::Column::RunKey)
            .into_tuple::<String>()
            .all(self.connection())
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to read run keys: {}", e)))?
            .into_iter()
            .collect();

        let (runs, skipped): (Vec<_>, Vec<_>) = test_run::Entity::find()
            .order_by_asc(test_run::Column::Id)
            .all(source.connection())
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to read snapshot runs: {}", e)))?
            .into_iter()
            .partition(|run| !existing_keys.contains(&run.run_key));

        for run in &skipped {
            warn!(run_id = %run.id, run_key = %run.run_key, "Run already present; skipping");
        }
        let run_ids: HashSet<String> = runs.iter().map(|run| run.id.clone()).collect();

        let txn = self.connection().begin().await?;
        insert_runs(&txn, &runs).await?;
        let cases = copy_cases(source.connection(), &run_ids, |page| {
            let txn = &txn;
            async move { insert_cases(txn, &page).await }
        })
        .await?;

        if txn.get_database_backend() == DatabaseBackend::Postgres {
            txn.execute_unprepared(
                "SELECT setval(pg_get_serial_sequence('test_cases', 'id'), \
                 COALESCE((SELECT MAX(id) FROM test_cases), 1))",
            )
            .await?;
        }
        txn.commit().await?;
        source.close().await?;

        info!(runs = runs.len(), cases, skipped = skipped.len(), snapshot = %snapshot.display(), "Imported snapshot");
        Ok(TransferSummary {
            runs: runs.len() as u64,
            cases,
            skipped_runs: skipped.len() as u64,
            revision: head,
        })
    }
}
