//! CLI argument definitions using clap

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(about = "Run shell commands concurrently and report every failure")]
#[command(version)]
pub struct Cli {
    /// Commands to run with `sh -c` (read from stdin, one per line, if omitted)
    pub commands: Vec<String>,

    /// Maximum number of commands running at once (0 = unlimited)
    #[arg(short = 'j', long)]
    pub limit: Option<usize>,

    /// Skip commands that have not started yet once one fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Skip commands that have not started after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Runner configuration file (JSON, TOML or YAML)
    #[arg(long, env = "FANOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short)]
    pub verbose: bool,
}
