//! Application configuration loaded from environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Primary environment variable naming the store connection string.
pub const PRIMARY_DB_ENV: &str = "PYTEST_RESULTS_DB_URL";

/// Legacy variables honored when the primary is unset, in priority order.
pub const LEGACY_DB_ENVS: &[&str] = &["TEST_RESULTS_DATABASE_URL", "SCS_DATABASE_URL"];

/// Default values used when nothing is configured.
pub mod defaults {
    pub const DB_FILE_NAME: &str = "test_results.db";
    pub const SUITE: &str = "pytest";
    pub const PROJECT_LIKE: &str = "%";
    pub const RUNNER: &str = "pytest";
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection string (normalized for SeaORM)
    pub database_url: String,
    /// Default project label (`PYTEST_RESULTS_PROJECT`)
    pub project: Option<String>,
    /// Default suite label (`PYTEST_RESULTS_SUITE`)
    pub suite: Option<String>,
    /// Default JSON-lines artifact path (`PYTEST_RESULTS_JSONL`)
    pub jsonl_path: Option<PathBuf>,
    /// Repository root used for the default SQLite store and `run`
    pub repo_root: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PYTEST_RESULTS_DB_URL`: store URL (primary)
    /// - `TEST_RESULTS_DATABASE_URL`, `SCS_DATABASE_URL`: legacy fallbacks, in that order
    /// - `PYTEST_CHRONICLE_REPO_ROOT`: repository root override
    /// - `GITHUB_WORKSPACE`: repository root on GitHub Actions
    /// - `PYTEST_RESULTS_PROJECT`, `PYTEST_RESULTS_SUITE`, `PYTEST_RESULTS_JSONL`: defaults
    ///
    /// An explicit URL (e.g. a `--database-url` flag) wins over all of them. With no
    /// URL configured the store is `<repo_root>/test_results.db`.
    pub fn resolve(explicit_url: Option<&str>) -> Result<Self, ConfigError> {
        let lookup = |name: &str| env::var(name).ok();
        let repo_root = resolve_repo_root(lookup);

        let raw_url = match explicit_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => resolve_database_url(lookup).unwrap_or_else(|| {
                default_sqlite_url(&repo_root.join(defaults::DB_FILE_NAME))
            }),
        };

        Ok(Config {
            database_url: normalize_database_url(&raw_url)?,
            project: non_empty(lookup("PYTEST_RESULTS_PROJECT")),
            suite: non_empty(lookup("PYTEST_RESULTS_SUITE")),
            jsonl_path: non_empty(lookup("PYTEST_RESULTS_JSONL")).map(PathBuf::from),
            repo_root,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Return the configured store URL, honoring legacy variables in fixed order.
pub fn resolve_database_url(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    std::iter::once(PRIMARY_DB_ENV)
        .chain(LEGACY_DB_ENVS.iter().copied())
        .find_map(|name| non_empty(lookup(name)))
}

/// Locate the repository root.
pub fn resolve_repo_root(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(root) = non_empty(lookup("PYTEST_CHRONICLE_REPO_ROOT")) {
        return PathBuf::from(root);
    }
    if let Some(root) = non_empty(lookup("GITHUB_WORKSPACE")) {
        return PathBuf::from(root);
    }

    let git_root = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|root| !root.is_empty());

    match git_root {
        Some(root) => PathBuf::from(root),
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Build a SQLite URL for a file path.
pub fn default_sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

/// Normalize driver-qualified URLs into ones SeaORM understands.
///
/// SQLite file URLs gain `mode=rwc` so a missing file is created.
pub fn normalize_database_url(url: &str) -> Result<String, ConfigError> {
    let url = url.trim();

    for prefix in ["postgresql+asyncpg://", "postgresql+psycopg2://", "postgresql://"] {
        if let Some(rest) = url.strip_prefix(prefix) {
            return Ok(format!("postgres://{}", rest));
        }
    }
    if url.starts_with("postgres://") {
        return Ok(url.to_string());
    }

    let mut path = if let Some(rest) = url
        .strip_prefix("sqlite+aiosqlite://")
        .or_else(|| url.strip_prefix("sqlite+pysqlite://"))
    {
        // SQLAlchemy: the third slash is a separator, a fourth makes the path absolute
        rest.strip_prefix('/').unwrap_or(rest).to_string()
    } else if let Some(rest) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) {
        rest.to_string()
    } else {
        return Err(ConfigError::UnsupportedUrl(url.to_string()));
    };

    if path.starts_with("//") {
        path = format!("/{}", path.trim_start_matches('/'));
    }

    if path.contains(":memory:") || path.contains("mode=") {
        Ok(format!("sqlite://{}", path))
    } else if path.contains('?') {
        Ok(format!("sqlite://{}&mode=rwc", path))
    } else {
        Ok(format!("sqlite://{}?mode=rwc", path))
    }
}

/// Extract the filesystem path from a SQLite URL, if it names a file.
pub fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite://")?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported database URL '{0}'. Expected postgres:// or sqlite://")]
    UnsupportedUrl(String),
}
