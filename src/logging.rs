//! Tracing subscriber setup.
//!
//! Logs go to stderr so stdout stays machine-readable (nodeids, run ids).
//! `RUST_LOG` overrides the verbosity flags; `RUST_LOG_FORMAT=json` switches to JSON lines.

use tracing_subscriber::EnvFilter;

/// Default filter directive for a given `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "pytest_chronicle=warn",
        1 => "pytest_chronicle=info",
        _ => "pytest_chronicle=debug",
    }
}

/// Initialize the global tracing subscriber. Later calls are no-ops.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let is_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if is_json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
