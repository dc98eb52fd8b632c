//! Summary normalizer: turns an input artifact into a [`NormalizedRun`].
//!
//! Malformed cases are rejected one by one and recorded as [`ParseIssue`]s; the
//! caller decides whether issues are fatal (single-file ingest) or warnings (backfill).

use std::collections::BTreeMap;
use std::path::{Component, Path};

use chrono::{DateTime, SubsecRound, Utc};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::summary::json_text;
use crate::models::{
    AggregatedSummary, CaseStatus, InputShape, NewCase, NewRun, NormalizedRun, ParseIssue,
    PhaseOutcome, PhaseRecord, SummaryCase, TestLineRecord,
};
use crate::services::git::{self, GitInfo};

/// Directory names that introduce a project in a monorepo layout.
const PROJECT_ROOTS: &[&str] = &["packages", "services", "apps", "workers", "connectors", "libs"];

const PHASE_ORDER: &[&str] = &["setup", "call", "teardown"];

/// Run-level context not carried by the artifact itself.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub project: Option<String>,
    pub suite: Option<String>,
    pub run_key: Option<String>,
    /// Fixed run id (`--run-id`)
    pub run_id: Option<String>,
    /// Code hash for line records, which carry none
    pub code_hash: Option<String>,
    /// GPU label for line records
    pub gpu: Option<String>,
    pub git: GitInfo,
    pub ci: BTreeMap<String, String>,
    pub host: String,
    /// Directory used to relativize artifact paths for project detection
    pub cwd: Option<std::path::PathBuf>,
    /// Fallback execution start when the artifact has none
    pub now: DateTime<Utc>,
}

impl RunContext {
    /// Gather git, CI and host context from the environment.
    pub fn from_env(repo_root: &Path) -> Self {
        let lookup = |name: &str| std::env::var(name).ok();
        RunContext {
            gpu: lookup("TEST_RESULTS_GPU").or_else(|| lookup("GPU")),
            git: GitInfo::collect(repo_root),
            ci: git::ci_context(lookup),
            host: git::host_name(lookup),
            cwd: std::env::current_dir().ok(),
            now: Utc::now(),
            ..Default::default()
        }
    }
}

/// Read and normalize an artifact, detecting its shape from the file name.
pub fn load(path: &Path, ctx: &RunContext) -> AppResult<NormalizedRun> {
    load_as(path, InputShape::from_path(path), ctx)
}

/// Read and normalize an artifact of a known shape.
pub fn load_as(path: &Path, shape: InputShape, ctx: &RunContext) -> AppResult<NormalizedRun> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::FileSystem(format!("Failed to read {}: {}", path.display(), e)))?;

    match shape {
        InputShape::Summary => normalize_summary(&text, path, ctx),
        InputShape::Lines => normalize_lines(&text, path, ctx),
    }
}

/// Project label derived from an artifact path.
///
/// `.../packages/<name>/...` (and the other monorepo roots) yields `packages/<name>`;
/// anything else yields the artifact's parent directory.
pub fn detect_project(path: &Path, cwd: Option<&Path>) -> String {
    let rel = cwd
        .and_then(|cwd| path.strip_prefix(cwd).ok())
        .unwrap_or(path);

    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    // The last component is the artifact itself
    let dirs = &parts[..parts.len().saturating_sub(1)];
    for (idx, part) in dirs.iter().enumerate() {
        if PROJECT_ROOTS.contains(&part.as_str())
            && let Some(name) = dirs.get(idx + 1)
        {
            return format!("{}/{}", part, name);
        }
    }

    match rel.parent().map(|p| p.to_string_lossy().to_string()) {
        Some(parent) if !parent.is_empty() => parent,
        _ => ".".to_string(),
    }
}

/// Suite label `pytest[-<gpu>][:<marks>]`.
pub fn detect_suite(gpu: &str, marks: &str) -> String {
    let mut suite = crate::config::defaults::SUITE.to_string();
    if !gpu.is_empty() {
        suite.push('-');
        suite.push_str(gpu);
    }
    if !marks.is_empty() {
        suite.push(':');
        suite.push_str(marks);
    }
    suite
}

/// First `E ` line of a pytest traceback, without the prefix.
pub fn failure_message(detail: &str) -> Option<String> {
    detail
        .lines()
        .find_map(|line| line.strip_prefix("E "))
        .map(|msg| msg.trim().to_string())
        .filter(|msg| !msg.is_empty())
}

fn base_run(ctx: &RunContext, project: String) -> NewRun {
    let git = &ctx.git;
    let mut run = NewRun::new(project, ctx.now);
    run.head_sha = git.head_sha.clone();
    run.branch = git.branch.clone();
    run.parent_sha = git.parent_sha.clone();
    run.origin_url = git.origin_url.clone();
    run.describe = git.describe.clone();
    run.commit_timestamp = git.commit_timestamp.clone();
    run.is_dirty = git.is_dirty;
    run.host = ctx.host.clone();
    run.ci = ctx.ci.clone();
    run.run_key = ctx.run_key.clone();
    run.id = ctx.run_id.clone();
    run
}

fn finish(source: &Path, run: NewRun, cases: Vec<NewCase>, issues: Vec<ParseIssue>) -> AppResult<NormalizedRun> {
    if cases.is_empty() {
        return Err(match issues.first() {
            Some(issue) => AppError::EmptyInput(format!(
                "{} ({} rejected, first: {})",
                source.display(),
                issues.len(),
                issue
            )),
            None => AppError::EmptyInput(source.display().to_string()),
        });
    }

    debug!(
        source = %source.display(),
        cases = cases.len(),
        rejected = issues.len(),
        "Normalized artifact"
    );
    Ok(NormalizedRun { run, cases, issues })
}

/// Normalize an aggregated summary document.
pub fn normalize_summary(text: &str, source: &Path, ctx: &RunContext) -> AppResult<NormalizedRun> {
    let doc: AggregatedSummary = serde_json::from_str(text)
        .map_err(|e| AppError::Parse(format!("{}: {}", source.display(), e)))?;

    let Some(section) = doc.junit.as_ref() else {
        return Err(AppError::Parse(format!(
            "{}: missing test results section (`junit`)",
            source.display()
        )));
    };

    let gpu = doc.gpu.clone().unwrap_or_default();
    let marks = json_text(doc.marks.as_ref());
    let project = ctx
        .project
        .clone()
        .unwrap_or_else(|| detect_project(source, ctx.cwd.as_deref()));

    let mut run = base_run(ctx, project);
    run.suite = Some(ctx.suite.clone().unwrap_or_else(|| detect_suite(&gpu, &marks)));
    if let Some(head) = doc.head_sha.as_deref().filter(|h| !h.is_empty()) {
        run.head_sha = head.to_string();
    }
    run.code_hash = doc.code_hash_excluding_reports.clone().unwrap_or_default();
    run.gpu = gpu;
    run.marks = marks;
    run.pytest_args = json_text(doc.pytest_args.as_ref());
    run.report_dir = doc.report_dir.clone().unwrap_or_default();
    run.env = doc.env.clone();

    if let Some(raw) = doc.timestamp.as_deref() {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => {
                run.started_at = ts.with_timezone(&Utc).trunc_subsecs(6);
                run.started_at_from_source = true;
            }
            Err(e) => debug!(timestamp = raw, error = %e, "Ignoring unparseable timestamp"),
        }
    }

    let mut cases = Vec::with_capacity(section.cases.len());
    let mut issues = Vec::new();
    for (idx, raw) in section.cases.iter().enumerate() {
        let location = format!("case #{}", idx + 1);
        match serde_json::from_value::<SummaryCase>(raw.clone()) {
            Ok(case) => match summary_case(case) {
                Ok(case) => cases.push(case),
                Err(reason) => issues.push(ParseIssue { location, reason }),
            },
            Err(e) => issues.push(ParseIssue {
                location,
                reason: e.to_string(),
            }),
        }
    }

    finish(source, run, cases, issues)
}

fn summary_case(case: SummaryCase) -> Result<NewCase, String> {
    let nodeid = case
        .nodeid
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or("missing nodeid")?;
    let raw_status = case.status.ok_or("missing status")?;
    let status =
        CaseStatus::parse(&raw_status).ok_or_else(|| format!("unknown status '{}'", raw_status))?;

    let message = case
        .message
        .filter(|m| !m.is_empty())
        .or_else(|| case.detail.as_deref().and_then(failure_message));

    let mut normalized = NewCase::new(nodeid, status)
        .with_duration(case.time_sec.unwrap_or(0.0))
        .with_message(message)
        .with_detail(case.detail)
        .with_output(
            case.stdout.as_deref().unwrap_or_default(),
            case.stderr.as_deref().unwrap_or_default(),
        );
    if let Some(classname) = case.classname.filter(|c| !c.is_empty()) {
        normalized.classname = classname;
    }
    if let Some(name) = case.name.filter(|n| !n.is_empty()) {
        normalized.name = name;
    }
    Ok(normalized)
}

/// Normalize per-test line records into one synthetic run.
pub fn normalize_lines(text: &str, source: &Path, ctx: &RunContext) -> AppResult<NormalizedRun> {
    let project = ctx
        .project
        .clone()
        .unwrap_or_else(|| detect_project(source, ctx.cwd.as_deref()));
    let gpu = ctx.gpu.clone().unwrap_or_else(|| "cpu".to_string());

    let mut run = base_run(ctx, project);
    run.suite = Some(ctx.suite.clone().unwrap_or_else(|| detect_suite(&gpu, "")));
    run.code_hash = ctx.code_hash.clone().unwrap_or_default();
    run.gpu = gpu;
    run.report_dir = source
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let mut cases = Vec::new();
    let mut issues = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let location = format!("line {}", idx + 1);
        match serde_json::from_str::<TestLineRecord>(line) {
            Ok(record) => match line_case(record) {
                Ok(case) => cases.push(case),
                Err(reason) => issues.push(ParseIssue { location, reason }),
            },
            Err(e) => issues.push(ParseIssue {
                location,
                reason: format!("invalid JSON: {}", e),
            }),
        }
    }

    finish(source, run, cases, issues)
}

fn line_case(record: TestLineRecord) -> Result<NewCase, String> {
    let nodeid = record
        .nodeid
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or("missing nodeid")?;

    let call = record.phases.get("call");
    let raw_outcome = record
        .outcome
        .clone()
        .filter(|o| !o.is_empty())
        .or_else(|| call.and_then(|c| c.outcome.clone()))
        .ok_or("missing outcome")?;
    let mut status =
        CaseStatus::parse(&raw_outcome).ok_or_else(|| format!("unknown outcome '{}'", raw_outcome))?;

    let failing: Vec<(&str, &PhaseRecord)> = PHASE_ORDER
        .iter()
        .filter_map(|name| record.phases.get(*name).map(|phase| (*name, phase)))
        .filter(|(_, phase)| phase.failed())
        .collect();

    if status == CaseStatus::Failed
        && !failing.is_empty()
        && failing.iter().all(|(name, _)| *name != "call")
    {
        status = CaseStatus::Error;
    }

    let detail = merge_phase_text(&failing, call, |p| p.longrepr.as_deref());
    let stdout = merge_phase_text(&failing, call, |p| p.stdout.as_deref());
    let stderr = merge_phase_text(&failing, call, |p| p.stderr.as_deref());
    let message = failure_message(&detail);

    let duration = record
        .duration
        .or_else(|| call.and_then(|c| c.duration))
        .unwrap_or(0.0);

    let phases: BTreeMap<String, PhaseOutcome> = record
        .phases
        .iter()
        .map(|(name, phase)| {
            (
                name.clone(),
                PhaseOutcome {
                    outcome: phase.outcome.clone().unwrap_or_default(),
                    duration: phase.duration.unwrap_or(0.0),
                },
            )
        })
        .collect();

    let mut case = NewCase::new(nodeid, status)
        .with_duration(duration)
        .with_message(message)
        .with_detail(Some(detail))
        .with_output(&stdout, &stderr);
    if !phases.is_empty() {
        case.phases = Some(phases);
    }
    Ok(case)
}

/// Join one text field across the failing phases (or the call phase when none failed).
fn merge_phase_text<'a>(
    failing: &[(&str, &'a PhaseRecord)],
    call: Option<&'a PhaseRecord>,
    field: impl Fn(&'a PhaseRecord) -> Option<&'a str>,
) -> String {
    let sources: Vec<(&str, &PhaseRecord)> = if failing.is_empty() {
        call.map(|c| vec![("call", c)]).unwrap_or_default()
    } else {
        failing.to_vec()
    };
    let headed = failing.len() > 1;

    sources
        .into_iter()
        .filter_map(|(name, phase)| {
            let text = field(phase).filter(|t| !t.is_empty())?;
            Some(if headed {
                format!("== {} ==\n{}", name, text)
            } else {
                text.to_string()
            })
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
