//! Input DTOs for the two artifact shapes accepted by the normalizer.
//!
//! These types are deliberately permissive: every field is optional so that a
//! malformed case can be rejected on its own instead of failing the document.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Which artifact shape a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// One JSON document with run metadata and embedded cases
    Summary,
    /// One JSON object per line, one line per test
    Lines,
}

impl InputShape {
    /// Guess the shape from the file extension (`.jsonl`/`.ndjson` are line records).
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") => Self::Lines,
            _ => Self::Summary,
        }
    }
}

/// Aggregated run summary document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregatedSummary {
    pub status: Option<String>,
    /// RFC 3339 execution start
    pub timestamp: Option<String>,
    pub head_sha: Option<String>,
    pub code_hash_excluding_reports: Option<String>,
    pub report_dir: Option<String>,
    pub gpu: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, JsonValue>,
    /// Marker expression; a string or a list of strings
    pub marks: Option<JsonValue>,
    /// Runner arguments; a string or a list of strings
    pub pytest_args: Option<JsonValue>,
    #[serde(alias = "test_results")]
    pub junit: Option<TestResultsSection>,
}

/// Nested test-results object of an aggregated summary.
///
/// Counters are informational only; stored counters come from accepted cases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestResultsSection {
    pub tests: Option<i64>,
    pub failures: Option<i64>,
    pub errors: Option<i64>,
    pub skipped: Option<i64>,
    pub passed: Option<i64>,
    pub time_sec: Option<f64>,
    /// Raw case objects, decoded one at a time
    #[serde(default)]
    pub cases: Vec<JsonValue>,
}

/// One case object inside an aggregated summary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryCase {
    pub classname: Option<String>,
    pub name: Option<String>,
    pub nodeid: Option<String>,
    pub time_sec: Option<f64>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// One per-test line record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestLineRecord {
    pub nodeid: Option<String>,
    pub duration: Option<f64>,
    pub outcome: Option<String>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseRecord>,
}

/// Per-phase data inside a line record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhaseRecord {
    pub outcome: Option<String>,
    pub duration: Option<f64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub longrepr: Option<String>,
}

impl PhaseRecord {
    pub fn failed(&self) -> bool {
        self.outcome
            .as_deref()
            .map(|o| o.eq_ignore_ascii_case("failed") || o.eq_ignore_ascii_case("error"))
            .unwrap_or(false)
    }
}

/// A case that was rejected during normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseIssue {
    /// Where in the artifact, e.g. `line 4` or `case #2`
    pub location: String,
    pub reason: String,
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.reason)
    }
}

/// Flatten a string-or-list JSON value into a single space-separated string.
pub fn json_text(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| json_text(Some(item)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
    }
}
