//! Add lookup indexes for the latest-failure queries.
//!
//! On PostgreSQL the CI context also gets a GIN index.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

use super::m20250917_000001_create_test_runs_and_cases::{TestCase, TestRun};

#[derive(DeriveMigrationName)]
pub struct Migration;

const RUN_INDEXES: &[(&str, TestRun)] = &[
    ("idx_test_runs_created_at", TestRun::CreatedAt),
    ("idx_test_runs_project", TestRun::Project),
    ("idx_test_runs_suite", TestRun::Suite),
    ("idx_test_runs_branch", TestRun::Branch),
];

const CASE_INDEXES: &[(&str, TestCase)] = &[
    ("idx_test_cases_run_id", TestCase::RunId),
    ("idx_test_cases_status", TestCase::Status),
    ("idx_test_cases_nodeid", TestCase::Nodeid),
];

const CI_GIN_INDEX: &str = "idx_test_runs_ci_gin";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for (name, column) in RUN_INDEXES {
            manager
                .create_index(
                    Index::create()
                        .name(*name)
                        .table(TestRun::Table)
                        .col(*column)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
        }

        for (name, column) in CASE_INDEXES {
            manager
                .create_index(
                    Index::create()
                        .name(*name)
                        .table(TestCase::Table)
                        .col(*column)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
        }

        if manager.get_database_backend() == DatabaseBackend::Postgres {
            manager
                .get_connection()
                .execute_unprepared(&format!(
                    "CREATE INDEX IF NOT EXISTS {} ON test_runs USING GIN (ci)",
                    CI_GIN_INDEX
                ))
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() == DatabaseBackend::Postgres {
            manager
                .get_connection()
                .execute_unprepared(&format!("DROP INDEX IF EXISTS {}", CI_GIN_INDEX))
                .await?;
        }

        for (name, _) in CASE_INDEXES {
            manager
                .drop_index(Index::drop().name(*name).table(TestCase::Table).to_owned())
                .await?;
        }
        for (name, _) in RUN_INDEXES {
            manager
                .drop_index(Index::drop().name(*name).table(TestRun::Table).to_owned())
                .await?;
        }

        Ok(())
    }
}
