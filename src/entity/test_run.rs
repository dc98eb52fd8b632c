//! TestRun entity for SeaORM.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "test_runs")]
pub struct Model {
    /// UUIDv7 rendered as a string; time-ordered
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Execution start, microsecond precision
    pub created_at: DateTimeUtc,
    pub project: String,
    pub suite: Option<String>,
    /// Worst case status, derived at ingestion
    pub status: String,
    pub head_sha: String,
    pub code_hash: String,
    pub branch: String,
    pub parent_sha: String,
    pub origin_url: String,
    pub describe: String,
    pub commit_timestamp: String,
    pub is_dirty: bool,
    pub gpu: String,
    pub marks: String,
    pub pytest_args: String,
    pub platform: String,
    pub host: String,
    pub tests: i32,
    pub failures: i32,
    pub errors: i32,
    pub skipped: i32,
    pub passed: i32,
    pub time_sec: f64,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub env: Option<JsonValue>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub ci: Option<JsonValue>,
    pub report_dir: String,
    /// Run fingerprint
    #[sea_orm(unique)]
    pub run_key: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::test_case::Entity")]
    TestCases,
}

impl Related<super::test_case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestCases.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
