//! Test run domain model: one execution of a test suite.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value as JsonValue;

use super::case::{CaseStatus, NewCase};

/// Aggregate run status, derived from the run's cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Passed,
    Failed,
    Error,
    /// Nothing red, but not everything passed (some cases skipped)
    Mixed,
}

impl RunStatus {
    /// Derive the status from case outcomes: the worst case wins.
    pub fn from_cases<'a>(statuses: impl IntoIterator<Item = &'a CaseStatus>) -> Self {
        let worst = statuses
            .into_iter()
            .max_by_key(|s| s.severity())
            .copied()
            .unwrap_or(CaseStatus::Passed);

        match worst {
            CaseStatus::Error => Self::Error,
            CaseStatus::Failed => Self::Failed,
            CaseStatus::Skipped => Self::Mixed,
            CaseStatus::Passed => Self::Passed,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized run ready for ingestion (cases travel alongside).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRun {
    pub project: String,
    pub suite: Option<String>,
    /// Execution start, truncated to microseconds
    pub started_at: DateTime<Utc>,
    /// True when `started_at` came from the artifact rather than the ingest clock
    pub started_at_from_source: bool,
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
    pub report_dir: String,
    pub env: BTreeMap<String, JsonValue>,
    pub ci: BTreeMap<String, String>,
    /// Caller-supplied idempotency key overriding the computed fingerprint
    pub run_key: Option<String>,
    /// Caller-supplied run id; a UUIDv7 is generated when absent
    pub id: Option<String>,
}

impl NewRun {
    pub fn new(project: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        NewRun {
            project: project.into(),
            started_at: started_at.trunc_subsecs(6),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            ..Default::default()
        }
    }
}

/// Per-status counters derived from a run's cases.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunCounts {
    pub tests: i32,
    pub failures: i32,
    pub errors: i32,
    pub skipped: i32,
    pub passed: i32,
    pub time_sec: f64,
}

impl RunCounts {
    pub fn from_cases(cases: &[NewCase]) -> Self {
        cases.iter().fold(RunCounts::default(), |mut acc, case| {
            acc.tests += 1;
            acc.time_sec += case.time_sec;
            match case.status {
                CaseStatus::Passed => acc.passed += 1,
                CaseStatus::Failed => acc.failures += 1,
                CaseStatus::Error => acc.errors += 1,
                CaseStatus::Skipped => acc.skipped += 1,
            }
            acc
        })
    }
}
