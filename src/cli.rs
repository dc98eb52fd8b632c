//! Command-line surface.
//!
//! Results go to the given writer (stdout in the binary); diagnostics go through
//! `tracing` or straight to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{self, Config, defaults};
use crate::db::{DbPool, RevisionRange, revisions};
use crate::error::{AppError, AppResult};
use crate::models::{InputShape, ProjectFilter, RedMode, RedQuery};
use crate::services::backfill::{self, BackfillOptions, FileOutcome};
use crate::services::runner::{self, RunnerInvocation};
use crate::services::{git, normalizer, RunContext};

#[derive(Debug, Parser)]
#[command(name = "pytest-chronicle")]
#[command(version, about = "Record pytest outcomes over time and ask what is red right now")]
pub struct Cli {
    /// Store URL (overrides PYTEST_RESULTS_DB_URL and the legacy variables)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest one summary document or one JSON-lines artifact
    Ingest(IngestArgs),
    /// List tests whose latest recorded status is failed or error
    LatestRed(LatestRedArgs),
    /// Run the test runner for a project and ingest its results
    Run(RunArgs),
    /// Ingest historical summary files matched by glob patterns
    Backfill(BackfillArgs),
    /// Copy the whole store into a new SQLite file
    ExportSqlite(ExportArgs),
    /// Load a SQLite snapshot into the store
    ImportSqlite(ImportArgs),
    /// Schema revision management
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Aggregated summary JSON
    #[arg(long, conflicts_with = "jsonl")]
    pub summary: Option<PathBuf>,

    /// Per-test JSON-lines artifact (defaults to PYTEST_RESULTS_JSONL)
    #[arg(long)]
    pub jsonl: Option<PathBuf>,

    /// Project label (default: PYTEST_RESULTS_PROJECT or detected from the path)
    #[arg(long)]
    pub project: Option<String>,

    /// Suite label (default: PYTEST_RESULTS_SUITE or pytest[-gpu][:marks])
    #[arg(long)]
    pub suite: Option<String>,

    /// Idempotency key overriding the computed fingerprint
    #[arg(long)]
    pub run_key: Option<String>,

    /// Explicit run id, a UUID (generated when omitted)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Print the run id on success
    #[arg(long)]
    pub print_id: bool,
}

#[derive(Debug, Args)]
pub struct LatestRedArgs {
    #[arg(long, value_enum, default_value_t = RedMode::PerTest)]
    pub mode: RedMode,

    /// Exact project name
    #[arg(long, conflicts_with = "project_like")]
    pub project: Option<String>,

    /// SQL LIKE pattern for the project
    #[arg(long, default_value = defaults::PROJECT_LIKE)]
    pub project_like: String,

    #[arg(long)]
    pub suite: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    /// Emit one JSON object per red test instead of bare nodeids
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Project path relative to the repository root
    #[arg(default_value = ".")]
    pub project: PathBuf,

    #[arg(long)]
    pub suite: Option<String>,

    /// GPU label stored with the run
    #[arg(long, env = "GPU", default_value = "cpu")]
    pub gpu: String,

    /// Only run the tests; do not ingest
    #[arg(long)]
    pub skip_ingest: bool,

    /// Test runner command line
    #[arg(long, env = "PYTEST_CHRONICLE_RUNNER", default_value = defaults::RUNNER)]
    pub runner: String,

    /// JSON-lines artifact path (default: <project>/.artifacts/test-results/results.jsonl)
    #[arg(long)]
    pub jsonl_path: Option<PathBuf>,

    /// Arguments passed through to the runner (after `--`)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub runner_args: Vec<String>,
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// Glob pattern for summary files; repeatable
    #[arg(long = "glob", required = true)]
    pub globs: Vec<String>,

    /// List what would be ingested without touching the store
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub suite: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Destination SQLite file; must not exist
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Snapshot produced by export-sqlite
    #[arg(long)]
    pub sqlite: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Apply revisions up to a target
    Upgrade {
        #[arg(default_value = "head")]
        revision: String,
    },
    /// Revert revisions down to a target
    Downgrade { revision: String },
    /// Show the current revision
    Current,
    /// List revisions
    History {
        /// Range FROM:TO, e.g. `base:head`
        #[arg(short = 'r', long)]
        rev_range: Option<String>,
    },
    /// Record a revision without running migrations
    Stamp { revision: String },
    /// Scaffold a new empty revision file
    Revision {
        #[arg(short, long)]
        message: String,

        #[arg(long, default_value = "src/migration")]
        output_dir: PathBuf,
    },
}

/// Run a parsed command, returning the process exit code.
pub async fn execute(cli: Cli, out: &mut dyn Write) -> AppResult<u8> {
    let config = Config::resolve(cli.database_url.as_deref())?;

    match cli.command {
        Command::Ingest(args) => ingest(&config, args, out).await,
        Command::LatestRed(args) => latest_red(&config, args, out).await,
        Command::Run(args) => run(&config, args).await,
        Command::Backfill(args) => backfill(&config, args, out).await,
        Command::ExportSqlite(args) => {
            let pool = DbPool::new(&config).await?;
            let summary = pool.export_sqlite(&args.out).await?;
            writeln!(
                out,
                "Exported {} run(s) and {} case(s) to {} at revision {}",
                summary.runs,
                summary.cases,
                args.out.display(),
                summary.revision.unwrap_or_default()
            )?;
            Ok(0)
        }
        Command::ImportSqlite(args) => {
            let pool = DbPool::new(&config).await?;
            let summary = pool.import_sqlite(&args.sqlite).await?;
            writeln!(
                out,
                "Imported {} run(s) and {} case(s); skipped {} existing run(s)",
                summary.runs, summary.cases, summary.skipped_runs
            )?;
            Ok(0)
        }
        Command::Db { command } => db(&config, command, out).await,
    }
}

fn context(config: &Config, project: Option<String>, suite: Option<String>) -> RunContext {
    let mut ctx = RunContext::from_env(&config.repo_root);
    ctx.project = project.or_else(|| config.project.clone());
    ctx.suite = suite.or_else(|| config.suite.clone());
    ctx
}

async fn ingest(config: &Config, args: IngestArgs, out: &mut dyn Write) -> AppResult<u8> {
    let (path, shape) = match (args.summary, args.jsonl.or_else(|| config.jsonl_path.clone())) {
        (Some(summary), _) => (summary, InputShape::Summary),
        (None, Some(jsonl)) => (jsonl, InputShape::Lines),
        (None, None) => {
            return Err(AppError::InvalidInput(
                "Either --summary or --jsonl is required".to_string(),
            ));
        }
    };

    let run_id = args
        .run_id
        .as_deref()
        .map(|id| {
            Uuid::parse_str(id.trim())
                .map(|uuid| uuid.to_string())
                .map_err(|e| AppError::InvalidInput(format!("Invalid --run-id '{}': {}", id, e)))
        })
        .transpose()?;

    let mut ctx = context(config, args.project, args.suite);
    ctx.run_key = args.run_key;
    ctx.run_id = run_id;

    let normalized = normalizer::load_as(&path, shape, &ctx)?;
    if let Some(issue) = normalized.issues.first() {
        return Err(AppError::Parse(format!(
            "{}: {} malformed case(s), first at {}",
            path.display(),
            normalized.issues.len(),
            issue
        )));
    }

    let pool = DbPool::new(config).await?;
    pool.ensure_head().await?;
    let outcome = pool.ingest(&normalized).await?;

    if outcome.created {
        info!(run_id = %outcome.run_id, cases = outcome.cases, "Stored new run");
    } else {
        info!(run_id = %outcome.run_id, "Run already stored; nothing written");
    }
    if args.print_id {
        writeln!(out, "{}", outcome.run_id)?;
    }
    Ok(0)
}

async fn latest_red(config: &Config, args: LatestRedArgs, out: &mut dyn Write) -> AppResult<u8> {
    let query = RedQuery {
        mode: args.mode,
        project: match args.project {
            Some(name) => ProjectFilter::Exact(name),
            None => ProjectFilter::Like(args.project_like),
        },
        suite: args.suite,
        branch: args.branch,
    };

    if let Some(path) = config::sqlite_file_path(&config.database_url)
        && !path.exists()
    {
        warn!(path = %path.display(), "Store file does not exist; nothing to report");
        return Ok(0);
    }

    let pool = DbPool::new(config).await?;
    if pool.current_position().await? == 0 {
        warn!("Store has no schema yet; nothing to report");
        return Ok(0);
    }

    for case in pool.latest_red(&query).await? {
        if args.json {
            writeln!(out, "{}", serde_json::to_string(&case)?)?;
        } else {
            writeln!(out, "{}", case.nodeid)?;
        }
    }
    Ok(0)
}

fn project_paths(repo_root: &Path, project: &Path) -> (PathBuf, String) {
    let dir = if project.is_absolute() {
        project.to_path_buf()
    } else {
        repo_root.join(project)
    };
    let dir = dir.canonicalize().unwrap_or(dir);
    let root = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());

    let rel = match dir.strip_prefix(&root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => dir.display().to_string(),
    };
    (dir, rel)
}

async fn run(config: &Config, args: RunArgs) -> AppResult<u8> {
    let (project_dir, project_rel) = project_paths(&config.repo_root, &args.project);
    if !project_dir.is_dir() {
        eprintln!("Project directory not found: {}", project_dir.display());
        return Ok(runner::EXIT_MISSING_PROJECT);
    }

    let mut invocation = RunnerInvocation::new(
        &args.runner,
        &project_dir,
        &config.repo_root,
        args.jsonl_path.clone(),
    );
    invocation.gpu = args.gpu.clone();
    invocation.args = args.runner_args.clone();

    let runner_code = invocation.execute().await?;
    if args.skip_ingest {
        return Ok(runner::final_exit_code(runner_code, true));
    }

    let suite = args
        .suite
        .or_else(|| config.suite.clone())
        .unwrap_or_else(|| defaults::SUITE.to_string());
    let mut ctx = context(config, Some(project_rel.clone()), Some(suite));
    ctx.gpu = Some(args.gpu);
    ctx.code_hash = Some(git::project_code_hash(&config.repo_root, &project_rel));

    let ingested = async {
        let normalized = normalizer::load_as(&invocation.artifact, InputShape::Lines, &ctx)?;
        for issue in &normalized.issues {
            warn!(%issue, "Rejected case");
        }
        let pool = DbPool::new(config).await?;
        pool.ensure_head().await?;
        pool.ingest(&normalized).await
    }
    .await;

    match ingested {
        Ok(outcome) => {
            info!(run_id = %outcome.run_id, created = outcome.created, "Ingested runner results");
            Ok(runner::final_exit_code(runner_code, true))
        }
        Err(e) => {
            eprintln!("Ingestion failed: {}", e);
            Ok(runner::final_exit_code(runner_code, false))
        }
    }
}

async fn backfill(config: &Config, args: BackfillArgs, out: &mut dyn Write) -> AppResult<u8> {
    let files = backfill::discover(&args.globs)?;
    if files.is_empty() {
        writeln!(out, "No matching summary files found.")?;
        return Ok(0);
    }
    writeln!(out, "Found {} file(s).", files.len())?;

    let opts = BackfillOptions {
        dry_run: args.dry_run,
        context: context(config, args.project, args.suite),
    };

    let report = if args.dry_run {
        backfill::preview(&files, &opts)
    } else {
        let pool = DbPool::new(config).await?;
        pool.ensure_head().await?;
        backfill::run(&pool, &files, &opts).await
    };

    for (path, outcome) in &report.files {
        match outcome {
            FileOutcome::Planned { cases } => {
                writeln!(out, "Would ingest: {} ({} case(s))", path.display(), cases)?
            }
            FileOutcome::Ingested { run_id } => {
                writeln!(out, "Ingested: {} ({})", path.display(), run_id)?
            }
            FileOutcome::Skipped { run_id } => {
                writeln!(out, "Skipped: {} (already stored as {})", path.display(), run_id)?
            }
            FileOutcome::Failed { error } => {
                writeln!(out, "Failed to ingest {}: {}", path.display(), error)?
            }
        }
    }

    if report.dry_run {
        writeln!(out, "planned={} failed={}", report.planned(), report.failed())?;
    } else {
        writeln!(
            out,
            "ingested={} skipped={} failed={}",
            report.ingested(),
            report.skipped(),
            report.failed()
        )?;
    }

    Ok(if report.has_failures() { 1 } else { 0 })
}

async fn db(config: &Config, command: DbCommand, out: &mut dyn Write) -> AppResult<u8> {
    let line = match command {
        DbCommand::Revision {
            message,
            output_dir,
        } => {
            let path = revisions::generate(&message, &output_dir)?;
            eprintln!("Register the new migration in Migrator::migrations() to add it to the chain.");
            path.display().to_string()
        }
        DbCommand::Upgrade { revision } => {
            let pool = DbPool::new(config).await?;
            describe(pool.upgrade(&revision).await?)
        }
        DbCommand::Downgrade { revision } => {
            let pool = DbPool::new(config).await?;
            describe(pool.downgrade(&revision).await?)
        }
        DbCommand::Stamp { revision } => {
            let pool = DbPool::new(config).await?;
            describe(pool.stamp(&revision).await?)
        }
        DbCommand::Current => {
            let pool = DbPool::new(config).await?;
            match pool.current_revision().await? {
                Some(rev) if Some(&rev) == revisions::head().as_ref() => format!("{} (head)", rev),
                other => describe(other),
            }
        }
        DbCommand::History { rev_range } => {
            let range = match rev_range {
                Some(text) => RevisionRange::parse(&text)?,
                None => RevisionRange::default(),
            };
            let pool = DbPool::new(config).await?;
            pool.history(&range)
                .await?
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    if !line.is_empty() {
        writeln!(out, "{}", line)?;
    }
    Ok(0)
}

fn describe(revision: Option<String>) -> String {
    revision.unwrap_or_else(|| "<base>".to_string())
}
