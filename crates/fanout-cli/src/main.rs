//! Fanout CLI application
//!
//! Runs shell commands concurrently through a [`fanout_core::Runner`] and
//! reports every failure once all of them have finished.
//!
//! ```bash
//! # Two at a time, stop launching new commands after the first failure
//! fanout -j 2 --fail-fast "make lint" "make test" "make docs"
//!
//! # One command per line from stdin
//! cat jobs.txt | fanout -j 8
//! ```

mod args;
mod commands;
mod report;

use args::Cli;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence; --verbose only raises the fallback level
    let fallback = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = commands::run(cli).await?;
    std::process::exit(code);
}
