//! Clap derive structures for the `streamgate` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// streamgate -- long-poll event streaming pipeline
#[derive(Debug, Parser)]
#[command(
    name = "streamgate",
    version,
    about = "Stream events from a long-poll server into HTTP sinks",
    long_about = "Subscribes to long-poll event topics, screens events through dedup gates,\n\
        and delivers them to HTTP endpoints with bounded retries. The pipeline\n\
        is described by a TOML topology file.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Topology file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "STREAMGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy the topology and stream until interrupted
    Run(RunArgs),

    /// Validate the topology file and print the units it defines
    Check,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// How long shutdown waits for listeners to drain (e.g. "90s", "2m")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub stop_timeout: Option<Duration>,
}
