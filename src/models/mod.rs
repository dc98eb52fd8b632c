//! Domain models for pytest-chronicle.

pub mod case;
pub mod red;
pub mod run;
pub mod summary;

// Re-export commonly used types
pub use case::{CaseStatus, NewCase, PhaseOutcome, TEXT_CAP, cap_text};
pub use red::{ProjectFilter, RedCase, RedMode, RedQuery};
pub use run::{NewRun, RunCounts, RunStatus};
pub use summary::{
    AggregatedSummary, InputShape, ParseIssue, PhaseRecord, SummaryCase, TestLineRecord,
    TestResultsSection,
};

/// A normalized run with its accepted cases, ready for fingerprinting and ingestion.
#[derive(Debug, Clone)]
pub struct NormalizedRun {
    pub run: NewRun,
    pub cases: Vec<NewCase>,
    /// Cases rejected during normalization
    pub issues: Vec<ParseIssue>,
}

impl NormalizedRun {
    pub fn status(&self) -> RunStatus {
        RunStatus::from_cases(self.cases.iter().map(|c| &c.status))
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts::from_cases(&self.cases)
    }
}
