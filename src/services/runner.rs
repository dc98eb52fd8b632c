//! External test runner invocation for the `run` command.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Exit code when the runner passed but ingestion failed.
pub const EXIT_INGEST_FAILED: u8 = 4;

/// Exit code when the project directory does not exist.
pub const EXIT_MISSING_PROJECT: u8 = 2;

/// Where the collector writes its line records, relative to the project.
const DEFAULT_ARTIFACT: &str = ".artifacts/test-results/results.jsonl";

/// A prepared runner invocation.
#[derive(Debug, Clone)]
pub struct RunnerInvocation {
    /// Runner command line, e.g. `pytest` or `uv run --extra dev pytest`
    pub runner: String,
    pub project_dir: PathBuf,
    pub repo_root: PathBuf,
    /// JSON-lines artifact the collector writes to
    pub artifact: PathBuf,
    pub gpu: String,
    /// Arguments passed through to the runner
    pub args: Vec<String>,
}

impl RunnerInvocation {
    pub fn new(runner: &str, project_dir: &Path, repo_root: &Path, artifact: Option<PathBuf>) -> Self {
        RunnerInvocation {
            runner: runner.to_string(),
            project_dir: project_dir.to_path_buf(),
            repo_root: repo_root.to_path_buf(),
            artifact: artifact.unwrap_or_else(|| project_dir.join(DEFAULT_ARTIFACT)),
            gpu: "cpu".to_string(),
            args: Vec::new(),
        }
    }

    /// Full argv: runner words, the injected results flag, then pass-through args.
    pub fn argv(&self) -> AppResult<Vec<String>> {
        let mut argv: Vec<String> = self.runner.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(AppError::InvalidInput("Runner command is empty".to_string()));
        }
        argv.push("--results-jsonl".to_string());
        argv.push(self.artifact.display().to_string());
        argv.extend(self.args.iter().cloned());
        Ok(argv)
    }

    /// Create the artifact's directory and truncate the artifact.
    pub fn prepare_artifact(&self) -> AppResult<()> {
        if let Some(parent) = self.artifact.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.artifact, "")?;
        Ok(())
    }

    fn python_path(&self) -> String {
        let mut paths = vec![
            self.project_dir.display().to_string(),
            self.repo_root.display().to_string(),
        ];
        if let Ok(existing) = std::env::var("PYTHONPATH")
            && !existing.is_empty()
        {
            paths.push(existing);
        }
        paths.join(":")
    }

    /// Run the test runner in the project directory and return its exit code.
    pub async fn execute(&self) -> AppResult<i32> {
        self.prepare_artifact()?;
        let argv = self.argv()?;
        info!(command = %argv.join(" "), cwd = %self.project_dir.display(), "Starting test runner");

        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&self.project_dir)
            .env("TEST_RESULTS_GPU", &self.gpu)
            .env("PYTHONPATH", self.python_path())
            .env_remove("PYTEST_DISABLE_PLUGIN_AUTOLOAD")
            .status()
            .await
            .map_err(|e| AppError::Runner(format!("Failed to launch '{}': {}", argv[0], e)))?;

        let code = status.code().unwrap_or(1);
        info!(exit_code = code, "Test runner finished");
        Ok(code)
    }
}

/// Exit code of `run` given the runner's code and whether ingestion succeeded.
pub fn final_exit_code(runner_code: i32, ingest_ok: bool) -> u8 {
    if !ingest_ok && runner_code == 0 {
        return EXIT_INGEST_FAILED;
    }
    u8::try_from(runner_code).unwrap_or(1)
}
