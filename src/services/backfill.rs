//! Backfill orchestrator: discover historical artifacts and ingest them one by one.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::NormalizedRun;
use crate::services::normalizer::{self, RunContext};

/// Outcome of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Stored as a new run
    Ingested { run_id: String },
    /// Fingerprint already present
    Skipped { run_id: String },
    /// Would be ingested (dry run)
    Planned { cases: usize },
    Failed { error: String },
}

/// Per-file results of a backfill, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    pub dry_run: bool,
    pub files: Vec<(PathBuf, FileOutcome)>,
}

impl BackfillReport {
    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|(_, outcome)| pred(outcome)).count()
    }

    pub fn ingested(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Ingested { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped { .. }))
    }

    pub fn planned(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Planned { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Longest leading run of path components without glob metacharacters.
fn literal_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for component in Path::new(pattern).components() {
        if let Component::Normal(part) = component
            && has_glob_meta(&part.to_string_lossy())
        {
            break;
        }
        base.push(component.as_os_str());
    }
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}

fn compile(pattern: &str) -> AppResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| AppError::InvalidInput(format!("Invalid glob '{}': {}", pattern, e)))
}

/// Expand glob patterns into existing files, de-duplicated, in lexicographic order.
pub fn discover(patterns: &[String]) -> AppResult<Vec<PathBuf>> {
    let mut found = BTreeSet::new();

    for pattern in patterns {
        if !has_glob_meta(pattern) {
            let path = PathBuf::from(pattern);
            if path.is_file() {
                found.insert(path);
            }
            continue;
        }

        let matcher = compile(pattern)?;
        let base = literal_base(pattern);
        // Patterns without a directory part match against paths like `./x`
        let strip_dot = !pattern.starts_with("./") && base == Path::new(".");

        for entry in WalkDir::new(&base).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let candidate = if strip_dot {
                path.strip_prefix(".").unwrap_or(path)
            } else {
                path
            };
            if matcher.is_match(candidate) {
                found.insert(candidate.to_path_buf());
            }
        }
    }

    Ok(found.into_iter().collect())
}

/// Options shared by dry and real backfills.
#[derive(Debug, Clone, Default)]
pub struct BackfillOptions {
    pub dry_run: bool,
    pub context: RunContext,
}

fn normalize(path: &Path, opts: &BackfillOptions) -> AppResult<NormalizedRun> {
    let normalized = normalizer::load(path, &opts.context)?;
    for issue in &normalized.issues {
        warn!(file = %path.display(), %issue, "Rejected case");
    }
    Ok(normalized)
}

/// Normalize every file without touching any store.
pub fn preview(files: &[PathBuf], opts: &BackfillOptions) -> BackfillReport {
    let files = files
        .iter()
        .map(|path| {
            let outcome = match normalize(path, opts) {
                Ok(normalized) => FileOutcome::Planned {
                    cases: normalized.cases.len(),
                },
                Err(e) => FileOutcome::Failed {
                    error: e.to_string(),
                },
            };
            (path.clone(), outcome)
        })
        .collect();

    BackfillReport {
        dry_run: true,
        files,
    }
}

/// Ingest files sequentially; a failing file is recorded and the next one is tried.
///
/// With `dry_run` set this is [`preview`] and the pool is never used.
pub async fn run(pool: &DbPool, files: &[PathBuf], opts: &BackfillOptions) -> BackfillReport {
    if opts.dry_run {
        return preview(files, opts);
    }

    let mut report = BackfillReport::default();
    for path in files {
        let outcome = match normalize(path, opts) {
            Ok(normalized) => match pool.ingest(&normalized).await {
                Ok(result) if result.created => FileOutcome::Ingested {
                    run_id: result.run_id,
                },
                Ok(result) => FileOutcome::Skipped {
                    run_id: result.run_id,
                },
                Err(e) => FileOutcome::Failed {
                    error: e.to_string(),
                },
            },
            Err(e) => FileOutcome::Failed {
                error: e.to_string(),
            },
        };

        match &outcome {
            FileOutcome::Failed { error } => warn!(file = %path.display(), %error, "Backfill failed"),
            other => debug!(file = %path.display(), outcome = ?other, "Backfill file done"),
        }
        report.files.push((path.clone(), outcome));
    }

    info!(
        ingested = report.ingested(),
        skipped = report.skipped(),
        failed = report.failed(),
        "Backfill finished"
    );
    report
}
