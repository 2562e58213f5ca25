//! Command execution through the runner

use crate::args::Cli;
use crate::report::Summary;
use anyhow::{Context, bail};
use fanout_core::{CancelSignal, Runner, RunnerConfig};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Run every requested command and return the process exit code
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = resolve_config(&cli)?;

    let commands = if cli.commands.is_empty() {
        read_stdin_commands().await?
    } else {
        cli.commands.clone()
    };
    if commands.is_empty() {
        tracing::warn!("no commands to run");
        return Ok(0);
    }

    let parent = parent_signal(cli.timeout);

    let interrupt = parent.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, skipping commands that have not started");
            interrupt.cancel();
        }
    });

    tracing::info!(
        commands = commands.len(),
        limit = config.limit,
        fail_fast = config.cancel_on_failure,
        "starting"
    );

    let runner = Runner::new(&parent, config);
    for command in &commands {
        let command = command.clone();
        runner.go(move || run_command(command)).await;
    }

    let errors = runner.wait().await;
    let summary = Summary::new(commands.len(), &errors);
    summary.print(&errors);

    Ok(summary.exit_code())
}

/// Root signal for a run, expiring after `timeout_secs` when given
///
/// Timeouts too large to represent never expire.
fn parent_signal(timeout_secs: Option<u64>) -> CancelSignal {
    match timeout_secs {
        Some(secs) => CancelSignal::with_timeout(Duration::from_secs(secs)),
        None => CancelSignal::new(),
    }
}

/// Layer defaults, config file, environment and flags, in that order
pub fn resolve_config(cli: &Cli) -> anyhow::Result<RunnerConfig> {
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load_from_file(path)?,
        None => RunnerConfig::default(),
    }
    .apply_env()?;

    if let Some(limit) = cli.limit {
        config.limit = limit;
    }
    if cli.fail_fast {
        config.cancel_on_failure = true;
    }

    Ok(config)
}

async fn read_stdin_commands() -> anyhow::Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input = Vec::new();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read commands from stdin")?
    {
        input.push(line);
    }
    Ok(parse_command_lines(input))
}

/// Keep non-empty lines that are not `#` comments
pub fn parse_command_lines<I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

async fn run_command(command: String) -> anyhow::Result<()> {
    tracing::debug!(%command, "running");

    let status = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("Failed to spawn `{}`", command))?;

    if !status.success() {
        match status.code() {
            Some(code) => bail!("`{}` exited with status {}", command, code),
            None => bail!("`{}` was terminated by a signal", command),
        }
    }

    Ok(())
}
