//! Ingestion engine: idempotent insert of a normalized run and its cases.

use std::time::Duration;

use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, ConnectionTrait, DatabaseBackend, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entity::{test_case, test_run};
use crate::error::{AppError, AppResult};
use crate::models::{NewCase, NormalizedRun};
use crate::services::fingerprint::{self, Fingerprint};

use super::DbPool;

/// Cases per multi-row insert statement.
const CASE_BATCH: usize = 64;

/// Attempts at a write transaction that SQLite reports busy before giving up.
const BUSY_ATTEMPTS: u32 = 5;

/// Backoff before the first busy retry; doubles per attempt.
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// No-op write that takes SQLite's RESERVED lock when the transaction starts. A writer
/// blocked here waits on the busy timeout; one blocked after reading would fail at once.
const RESERVE_WRITE_LOCK: &str = "UPDATE test_runs SET id = id WHERE 1 = 0";

fn lookup_error(context: &str, err: DbErr) -> AppError {
    if crate::error::is_busy(&err) {
        AppError::Busy(format!("{}: {}", context, err))
    } else {
        AppError::StorageUnavailable(format!("{}: {}", context, err))
    }
}

/// Result of an ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub run_id: String,
    pub fingerprint: String,
    /// False when the fingerprint was already stored and nothing was written
    pub created: bool,
    pub cases: u64,
}

fn run_model(id: &str, fingerprint: &str, normalized: &NormalizedRun) -> AppResult<test_run::ActiveModel> {
    let run = &normalized.run;
    let counts = normalized.counts();

    Ok(test_run::ActiveModel {
        id: Set(id.to_string()),
        created_at: Set(run.started_at),
        project: Set(run.project.clone()),
        suite: Set(run.suite.clone()),
        status: Set(normalized.status().as_str().to_string()),
        head_sha: Set(run.head_sha.clone()),
        code_hash: Set(run.code_hash.clone()),
        branch: Set(run.branch.clone()),
        parent_sha: Set(run.parent_sha.clone()),
        origin_url: Set(run.origin_url.clone()),
        describe: Set(run.describe.clone()),
        commit_timestamp: Set(run.commit_timestamp.clone()),
        is_dirty: Set(run.is_dirty),
        gpu: Set(run.gpu.clone()),
        marks: Set(run.marks.clone()),
        pytest_args: Set(run.pytest_args.clone()),
        platform: Set(run.platform.clone()),
        host: Set(run.host.clone()),
        tests: Set(counts.tests),
        failures: Set(counts.failures),
        errors: Set(counts.errors),
        skipped: Set(counts.skipped),
        passed: Set(counts.passed),
        time_sec: Set(counts.time_sec),
        env: Set(Some(serde_json::to_value(&run.env)?)),
        ci: Set(Some(serde_json::to_value(&run.ci)?)),
        report_dir: Set(run.report_dir.clone()),
        run_key: Set(fingerprint.to_string()),
    })
}

fn case_model(run_id: &str, case: &NewCase) -> AppResult<test_case::ActiveModel> {
    let phases = case
        .phases
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;

    Ok(test_case::ActiveModel {
        id: NotSet,
        run_id: Set(run_id.to_string()),
        nodeid: Set(case.nodeid.clone()),
        classname: Set(case.classname.clone()),
        name: Set(case.name.clone()),
        status: Set(case.status.as_str().to_string()),
        time_sec: Set(case.time_sec),
        message: Set(case.message.clone()),
        detail: Set(case.detail.clone()),
        stdout_text: Set(case.stdout.clone()),
        stderr_text: Set(case.stderr.clone()),
        phases: Set(phases),
    })
}

async fn find_existing<C: ConnectionTrait>(
    conn: &C,
    fingerprint: &str,
) -> AppResult<Option<IngestOutcome>> {
    let Some(run) = test_run::Entity::find()
        .filter(test_run::Column::RunKey.eq(fingerprint))
        .one(conn)
        .await
        .map_err(|e| lookup_error("Failed to look up run key", e))?
    else {
        return Ok(None);
    };

    let cases = test_case::Entity::find()
        .filter(test_case::Column::RunId.eq(run.id.as_str()))
        .count(conn)
        .await
        .map_err(|e| lookup_error("Failed to count cases", e))?;

    Ok(Some(IngestOutcome {
        run_id: run.id,
        fingerprint: fingerprint.to_string(),
        created: false,
        cases,
    }))
}

impl DbPool {
    /// Ingest a normalized run.
    ///
    /// Idempotent under the run fingerprint: when a run with the same fingerprint exists,
    /// its id is returned and nothing is written. The run row and all case rows become
    /// visible in a single commit. A writer that loses a race on the unique `run_key`
    /// resolves to the winner's run. Writers in other processes sharing a SQLite file
    /// wait on its lock, and a transaction that still finds it busy is retried.
    pub async fn ingest(&self, normalized: &NormalizedRun) -> AppResult<IngestOutcome> {
        if normalized.cases.is_empty() {
            return Err(AppError::EmptyInput(format!(
                "run for project '{}'",
                normalized.run.project
            )));
        }

        let fp = fingerprint::compute(normalized);
        let mut backoff = BUSY_BACKOFF;
        for attempt in 1..=BUSY_ATTEMPTS {
            match self.insert_run(normalized, &fp).await {
                Err(AppError::DuplicateFingerprint(key)) => {
                    debug!(run_key = %key, "Lost insert race; reading existing run");
                    return find_existing(self.connection(), &key).await?.ok_or_else(|| {
                        AppError::StorageUnavailable(format!(
                            "Run key {} reported as duplicate but not found",
                            key
                        ))
                    });
                }
                Err(AppError::Busy(msg)) if attempt < BUSY_ATTEMPTS => {
                    warn!(attempt, error = %msg, "Store busy; retrying ingestion");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(AppError::Busy(msg)) => {
                    return Err(AppError::StorageUnavailable(format!(
                        "Store still busy after {} attempts: {}",
                        BUSY_ATTEMPTS, msg
                    )));
                }
                other => return other,
            }
        }

        Err(AppError::StorageUnavailable("Ingestion was not attempted".to_string()))
    }

    async fn insert_run(&self, normalized: &NormalizedRun, fp: &Fingerprint) -> AppResult<IngestOutcome> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| lookup_error("Failed to begin transaction", e))?;

        if txn.get_database_backend() == DatabaseBackend::Sqlite {
            txn.execute_unprepared(RESERVE_WRITE_LOCK)
                .await
                .map_err(|e| lookup_error("Failed to lock store for writing", e))?;
        }

        if let Some(existing) = find_existing(&txn, &fp.value).await? {
            info!(run_id = %existing.run_id, run_key = %fp.value, "Run already ingested");
            return Ok(existing);
        }

        let run_id = match &normalized.run.id {
            Some(id) => {
                let taken = test_run::Entity::find_by_id(id.clone())
                    .one(&txn)
                    .await
                    .map_err(|e| lookup_error("Failed to look up run id", e))?;
                if taken.is_some() {
                    return Err(AppError::InvalidInput(format!(
                        "Run id {} already belongs to another run",
                        id
                    )));
                }
                id.clone()
            }
            None => Uuid::now_v7().to_string(),
        };
        test_run::Entity::insert(run_model(&run_id, &fp.value, normalized)?)
            .exec_without_returning(&txn)
            .await
            .map_err(|e| AppError::from_write_error(e, &fp.value))?;

        let models = normalized
            .cases
            .iter()
            .map(|case| case_model(&run_id, case))
            .collect::<AppResult<Vec<_>>>()?;
        for chunk in models.chunks(CASE_BATCH) {
            test_case::Entity::insert_many(chunk.to_vec())
                .exec_without_returning(&txn)
                .await
                .map_err(|e| AppError::from_write_error(e, &fp.value))?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::from_write_error(e, &fp.value))?;

        info!(
            run_id = %run_id,
            project = %normalized.run.project,
            cases = models.len(),
            fingerprint = fp.kind.as_str(),
            "Ingested run"
        );

        Ok(IngestOutcome {
            run_id,
            fingerprint: fp.value.clone(),
            created: true,
            cases: models.len() as u64,
        })
    }
}
