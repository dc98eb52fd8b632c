//! Test case domain model: one test's outcome within a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Maximum stored length (in characters) of tracebacks and captured output.
pub const TEXT_CAP: usize = 20_000;

/// Marker appended to capped text.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Test case outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 4] = [Self::Passed, Self::Failed, Self::Error, Self::Skipped];

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    /// Parse an outcome as reported by pytest or a JUnit converter.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passed" | "pass" | "xpassed" => Some(Self::Passed),
            "failed" | "fail" | "failure" => Some(Self::Failed),
            "error" | "errored" => Some(Self::Error),
            "skipped" | "skip" | "xfailed" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Ordering used to derive a run's aggregate status: error > failed > skipped > passed.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Passed => 0,
            Self::Skipped => 1,
            Self::Failed => 2,
            Self::Error => 3,
        }
    }

    /// Whether this outcome counts as red.
    pub fn is_red(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single phase (setup/call/teardown), stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub outcome: String,
    pub duration: f64,
}

/// A normalized test case ready for ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCase {
    /// Qualified test identifier, e.g. `pkg/mod.py::TestX::test_y`
    pub nodeid: String,
    pub classname: String,
    pub name: String,
    pub status: CaseStatus,
    /// Duration in seconds (never negative)
    pub time_sec: f64,
    pub message: Option<String>,
    /// Traceback, capped at [`TEXT_CAP`]
    pub detail: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub phases: Option<BTreeMap<String, PhaseOutcome>>,
}

impl NewCase {
    /// Create a case, deriving classname/name from the nodeid.
    pub fn new(nodeid: impl Into<String>, status: CaseStatus) -> Self {
        let nodeid = nodeid.into();
        let (classname, name) = split_nodeid(&nodeid);
        NewCase {
            nodeid,
            classname,
            name,
            status,
            time_sec: 0.0,
            message: None,
            detail: None,
            stdout: String::new(),
            stderr: String::new(),
            phases: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.time_sec = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message.filter(|m| !m.is_empty());
        self
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail.filter(|d| !d.is_empty()).map(|d| cap_text(&d));
        self
    }

    pub fn with_output(mut self, stdout: &str, stderr: &str) -> Self {
        self.stdout = cap_text(stdout);
        self.stderr = cap_text(stderr);
        self
    }
}

/// Split `path::Class::test` into (`path`, `Class::test`).
pub fn split_nodeid(nodeid: &str) -> (String, String) {
    match nodeid.split_once("::") {
        Some((file, rest)) => (file.to_string(), rest.to_string()),
        None => (nodeid.to_string(), String::new()),
    }
}

/// Cap text at [`TEXT_CAP`] characters, appending [`TRUNCATION_MARKER`].
pub fn cap_text(value: &str) -> String {
    match value.char_indices().nth(TEXT_CAP) {
        Some((byte_idx, _)) => format!("{}{}", &value[..byte_idx], TRUNCATION_MARKER),
        None => value.to_string(),
    }
}
