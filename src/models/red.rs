//! Latest-failure query parameters and results.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;

/// Resolution mode for the red list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RedMode {
    /// Latest status of every test across all matching runs
    #[default]
    PerTest,
    /// Red cases of the single most recent matching run
    LatestRun,
}

/// Project filter: exact name or SQL LIKE pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectFilter {
    Exact(String),
    Like(String),
}

impl Default for ProjectFilter {
    fn default() -> Self {
        ProjectFilter::Like(crate::config::defaults::PROJECT_LIKE.to_string())
    }
}

/// Query for the latest-failure resolver.
#[derive(Debug, Clone, Default)]
pub struct RedQuery {
    pub mode: RedMode,
    pub project: ProjectFilter,
    pub suite: Option<String>,
    pub branch: Option<String>,
}

/// One currently-red test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedCase {
    pub nodeid: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub project: String,
    pub run_id: String,
    pub run_created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    pub branch: String,
    pub head_sha: String,
}
