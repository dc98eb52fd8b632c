//! Source-control and CI context captured alongside each run.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};

use sha2::{Digest, Sha256};
use tracing::debug;

/// CI environment variables recorded with a run.
pub const CI_ENV_KEYS: &[&str] = &[
    "CI",
    "GITHUB_RUN_ID",
    "GITHUB_RUN_NUMBER",
    "GITHUB_REF",
    "GITHUB_SHA",
    "GITHUB_REPOSITORY",
    "GITHUB_ACTOR",
    "BUILDKITE_BUILD_ID",
    "BUILDKITE_JOB_ID",
    "BUILDKITE_BRANCH",
    "BUILDKITE_COMMIT",
    "BRANCH_NAME",
];

/// Git metadata of the working tree. Empty strings when unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInfo {
    pub head_sha: String,
    pub branch: String,
    pub parent_sha: String,
    pub origin_url: String,
    pub describe: String,
    pub commit_timestamp: String,
    pub is_dirty: bool,
}

/// Run `git <args>` in `dir`, returning trimmed stdout or an empty string on failure.
fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        Ok(out) => {
            debug!(?args, status = ?out.status, "git command failed");
            String::new()
        }
        Err(e) => {
            debug!(?args, error = %e, "git not available");
            String::new()
        }
    }
}

impl GitInfo {
    /// Collect metadata for the repository containing `dir`.
    pub fn collect(dir: &Path) -> Self {
        GitInfo {
            head_sha: git(dir, &["rev-parse", "HEAD"]),
            branch: git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]),
            parent_sha: git(dir, &["rev-parse", "HEAD^"]),
            origin_url: git(dir, &["remote", "get-url", "origin"]),
            describe: git(dir, &["describe", "--always", "--dirty", "--tags"]),
            commit_timestamp: git(dir, &["show", "-s", "--format=%cI", "HEAD"]),
            is_dirty: !git(dir, &["status", "--porcelain"]).is_empty(),
        }
    }
}

/// Hash of the committed tree under `project_rel`: SHA-256 of `git ls-tree -r` output.
///
/// Empty when git is unavailable or the path holds no tracked files.
pub fn project_code_hash(repo_root: &Path, project_rel: &str) -> String {
    let listing = git(
        repo_root,
        &["ls-tree", "-r", "--full-tree", "HEAD", "--", project_rel],
    );
    if listing.is_empty() {
        return String::new();
    }

    let mut hasher = Sha256::new();
    hasher.update(listing.as_bytes());
    hasher.update(b"\n");
    hex::encode(hasher.finalize())
}

/// Capture well-known CI variables that are set.
pub fn ci_context(lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
    CI_ENV_KEYS
        .iter()
        .filter_map(|key| lookup(key).map(|value| (key.to_string(), value)))
        .collect()
}

/// Best-effort host name.
pub fn host_name(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("HOSTNAME")
        .or_else(|| lookup("COMPUTERNAME"))
        .or_else(|| {
            Command::new("hostname")
                .stderr(Stdio::null())
                .output()
                .ok()
                .filter(|out| out.status.success())
                .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        })
        .unwrap_or_default()
}
