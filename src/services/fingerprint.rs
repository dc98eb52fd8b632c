//! Run fingerprints: the idempotency key stored as `run_key`.
//!
//! The primary key hashes the run's identity (`project | suite | head_sha | code_hash |
//! marks | pytest_args | gpu`) plus an outcome digest, so a re-run on the same commit
//! with a different result gets a new fingerprint while an identical re-ingestion does
//! not. Suites or device variants executed against one commit stay distinct runs. When either the head sha or the code hash is
//! missing we hash a canonical rendering of the whole normalized payload instead,
//! which treats any change in durations, messages or metadata as a new run.

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::models::NormalizedRun;

/// How a fingerprint was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintKind {
    /// Run identity + source revision + outcome digest
    Primary,
    /// Canonical hash of the normalized payload
    Payload,
    /// Supplied by the caller (`--run-key`)
    Explicit,
}

impl FingerprintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Payload => "payload",
            Self::Explicit => "explicit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub value: String,
    pub kind: FingerprintKind,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest of `nodeid\tstatus` lines sorted by nodeid; collection order is irrelevant.
pub fn outcome_digest(normalized: &NormalizedRun) -> String {
    let mut lines: Vec<String> = normalized
        .cases
        .iter()
        .map(|case| format!("{}\t{}", case.nodeid, case.status.as_str()))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Canonical JSON of the payload; object keys serialize sorted.
fn payload_digest(normalized: &NormalizedRun) -> String {
    let run = &normalized.run;
    let mut cases: Vec<_> = normalized
        .cases
        .iter()
        .map(|case| {
            json!({
                "nodeid": case.nodeid,
                "status": case.status.as_str(),
                "time_sec": case.time_sec,
                "message": case.message,
                "detail": case.detail,
            })
        })
        .collect();
    cases.sort_by(|a, b| a["nodeid"].as_str().cmp(&b["nodeid"].as_str()));

    let started_at = run
        .started_at_from_source
        .then(|| run.started_at.to_rfc3339());

    let payload = json!({
        "project": run.project,
        "suite": run.suite,
        "started_at": started_at,
        "head_sha": run.head_sha,
        "code_hash": run.code_hash,
        "gpu": run.gpu,
        "marks": run.marks,
        "pytest_args": run.pytest_args,
        "env": run.env,
        "cases": cases,
    });

    sha256_hex(payload.to_string().as_bytes())
}

/// Compute the fingerprint for a normalized run.
pub fn compute(normalized: &NormalizedRun) -> Fingerprint {
    let run = &normalized.run;

    if let Some(key) = run.run_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        debug!(run_key = %key, "Using caller-supplied run key");
        return Fingerprint {
            value: key.to_string(),
            kind: FingerprintKind::Explicit,
        };
    }

    if !run.head_sha.is_empty() && !run.code_hash.is_empty() {
        let material = [
            run.project.as_str(),
            run.suite.as_deref().unwrap_or(""),
            run.head_sha.as_str(),
            run.code_hash.as_str(),
            run.marks.as_str(),
            run.pytest_args.as_str(),
            run.gpu.as_str(),
            outcome_digest(normalized).as_str(),
        ]
        .join("|");
        return Fingerprint {
            value: sha256_hex(material.as_bytes()),
            kind: FingerprintKind::Primary,
        };
    }

    warn!(
        project = %run.project,
        has_head_sha = !run.head_sha.is_empty(),
        has_code_hash = !run.code_hash.is_empty(),
        "Source revision or code hash missing; fingerprinting the full payload"
    );
    Fingerprint {
        value: payload_digest(normalized),
        kind: FingerprintKind::Payload,
    }
}
