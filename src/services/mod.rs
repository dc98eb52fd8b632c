//! Business logic services.

pub mod backfill;
pub mod fingerprint;
pub mod git;
pub mod normalizer;
pub mod runner;

pub use backfill::{BackfillOptions, BackfillReport, FileOutcome};
pub use fingerprint::{Fingerprint, FingerprintKind};
pub use git::GitInfo;
pub use normalizer::RunContext;
pub use runner::RunnerInvocation;
