//! Latest-failure resolver: which tests are red right now.

use sea_orm::{
    ColumnTrait, Condition, DatabaseBackend, EntityTrait, FromQueryResult, QueryFilter,
    QueryOrder, Statement, Value, prelude::DateTimeUtc,
};
use tracing::debug;

use crate::entity::{test_case, test_run};
use crate::error::{AppError, AppResult};
use crate::models::{CaseStatus, ProjectFilter, RedCase, RedMode, RedQuery};

use super::DbPool;

fn red_statuses() -> impl Iterator<Item = &'static str> {
    CaseStatus::ALL
        .into_iter()
        .filter(CaseStatus::is_red)
        .map(|status| status.as_str())
}

/// Winning case row per (project, nodeid), as returned by the ranking query.
#[derive(Debug, Clone, FromQueryResult)]
struct CaseRow {
    nodeid: String,
    status: String,
    message: Option<String>,
    run_id: String,
    project: String,
    created_at: DateTimeUtc,
    suite: Option<String>,
    branch: String,
    head_sha: String,
}

impl CaseRow {
    fn into_red_case(self) -> RedCase {
        RedCase {
            nodeid: self.nodeid,
            status: self.status,
            message: self.message,
            project: self.project,
            run_id: self.run_id,
            run_created_at: self.created_at,
            suite: self.suite,
            branch: self.branch,
            head_sha: self.head_sha,
        }
    }
}

/// Run-level filter shared by both modes.
fn run_condition(query: &RedQuery) -> Condition {
    let mut cond = Condition::all();
    cond = match &query.project {
        ProjectFilter::Exact(name) => cond.add(test_run::Column::Project.eq(name.as_str())),
        ProjectFilter::Like(pattern) => cond.add(test_run::Column::Project.like(pattern.as_str())),
    };
    if let Some(suite) = &query.suite {
        cond = cond.add(test_run::Column::Suite.eq(suite.as_str()));
    }
    if let Some(branch) = &query.branch {
        cond = cond.add(test_run::Column::Branch.eq(branch.as_str()));
    }
    cond
}

/// Bind parameters in backend placeholder syntax.
struct Params {
    backend: DatabaseBackend,
    values: Vec<Value>,
}

impl Params {
    fn new(backend: DatabaseBackend) -> Self {
        Params {
            backend,
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        match self.backend {
            DatabaseBackend::Postgres => format!("${}", self.values.len()),
            _ => "?".to_string(),
        }
    }
}

/// Ranks every case per (project, nodeid) by run recency and keeps the red winners.
/// Ties on the run timestamp fall to the greater run id, then the greater case id.
fn per_test_statement(backend: DatabaseBackend, query: &RedQuery) -> Statement {
    let mut params = Params::new(backend);
    let mut filters = vec![match &query.project {
        ProjectFilter::Exact(name) => format!("tr.project = {}", params.push(name.clone())),
        ProjectFilter::Like(pattern) => format!("tr.project LIKE {}", params.push(pattern.clone())),
    }];
    if let Some(suite) = &query.suite {
        filters.push(format!("tr.suite = {}", params.push(suite.clone())));
    }
    if let Some(branch) = &query.branch {
        filters.push(format!("tr.branch = {}", params.push(branch.clone())));
    }
    let red = red_statuses()
        .map(|status| params.push(status))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        r#"
        WITH ranked AS (
            SELECT
                tc.nodeid, tc.status, tc.message, tc.run_id,
                tr.project, tr.created_at, tr.suite, tr.branch, tr.head_sha,
                ROW_NUMBER() OVER (
                    PARTITION BY tr.project, tc.nodeid
                    ORDER BY tr.created_at DESC, tr.id DESC, tc.id DESC
                ) AS rn
            FROM test_cases tc
            JOIN test_runs tr ON tr.id = tc.run_id
            WHERE {}
        )
        SELECT nodeid, status, message, run_id, project, created_at, suite, branch, head_sha
        FROM ranked
        WHERE rn = 1 AND status IN ({})
        ORDER BY nodeid, project
        "#,
        filters.join(" AND "),
        red
    );

    Statement::from_sql_and_values(backend, &sql, params.values)
}

impl DbPool {
    /// Resolve the currently red tests for a query. No matching runs is an empty result.
    pub async fn latest_red(&self, query: &RedQuery) -> AppResult<Vec<RedCase>> {
        debug!(mode = ?query.mode, project = ?query.project, suite = ?query.suite, branch = ?query.branch, "Resolving latest red");
        match query.mode {
            RedMode::PerTest => self.latest_red_per_test(query).await,
            RedMode::LatestRun => self.latest_red_latest_run(query).await,
        }
    }

    async fn latest_red_per_test(&self, query: &RedQuery) -> AppResult<Vec<RedCase>> {
        let statement = per_test_statement(self.backend(), query);
        debug!(sql = %statement.sql, "Per-test ranking query");

        let rows = CaseRow::find_by_statement(statement)
            .all(self.connection())
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to query cases: {}", e)))?;

        Ok(rows.into_iter().map(CaseRow::into_red_case).collect())
    }

    async fn latest_red_latest_run(&self, query: &RedQuery) -> AppResult<Vec<RedCase>> {
        let Some(run) = test_run::Entity::find()
            .filter(run_condition(query))
            .order_by_desc(test_run::Column::CreatedAt)
            .order_by_desc(test_run::Column::Id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to find latest run: {}", e)))?
        else {
            return Ok(Vec::new());
        };

        debug!(run_id = %run.id, created_at = %run.created_at, "Latest matching run");

        let cases = test_case::Entity::find()
            .filter(test_case::Column::RunId.eq(run.id.as_str()))
            .filter(test_case::Column::Status.is_in(red_statuses()))
            .order_by_asc(test_case::Column::Nodeid)
            .order_by_asc(test_case::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to query cases: {}", e)))?;

        Ok(cases
            .into_iter()
            .map(|case| RedCase {
                nodeid: case.nodeid,
                status: case.status,
                message: case.message,
                project: run.project.clone(),
                run_id: run.id.clone(),
                run_created_at: run.created_at,
                suite: run.suite.clone(),
                branch: run.branch.clone(),
                head_sha: run.head_sha.clone(),
            })
            .collect())
    }
}
