//! pytest-chronicle command-line entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use pytest_chronicle::cli::{self, Cli};
use pytest_chronicle::logging;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut stdout = std::io::stdout();
    match cli::execute(cli, &mut stdout).await {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            debug!(?error, "Command failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}
