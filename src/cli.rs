//! CLI argument definitions using clap derive macros.
//!
//! Options that can also come from the config file are `Option`s with no
//! clap default, so "not given on the command line" stays observable.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand};

use harvester_core::TaskStatus;

/// Coordinate greeks history downloads across many worker processes.
///
/// Every process shares one SQLite task catalog; start as many `work`
/// processes as the terminal can serve.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/harvester/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Task catalog database file
    #[arg(long, value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Claim and process tasks until interrupted
    Work(WorkArgs),
    /// Add tasks to the catalog (`symbol,expiration,date`, args, stdin or --discover)
    Enqueue(EnqueueArgs),
    /// Show task counts by status
    Status(StatusArgs),
    /// Return tasks to pending with a fresh retry budget
    Reset(ResetArgs),
    /// Reclaim leases held longer than the lease timeout
    Reclaim(ReclaimArgs),
}

#[derive(Args, Debug, Default)]
pub struct WorkArgs {
    /// Attempts per task before a failure is terminal (0-100)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub max_retries: Option<u32>,

    /// Seconds before an in-progress lease is considered abandoned
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=604_800))]
    pub lease_timeout_secs: Option<u64>,

    /// Worker loops to run in this process (1-64)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub workers: Option<u32>,

    /// Root directory for stored CSV files
    #[arg(short = 'o', long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// ThetaData terminal base URL
    #[arg(long, value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Sampling interval to request (e.g. 5s, 1m)
    #[arg(long)]
    pub interval: Option<String>,

    /// Base pause between polls when nothing is claimable, in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub idle_interval_ms: Option<u64>,

    /// Seconds between in-process reclaim sweeps (0 disables)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=86_400))]
    pub reclaim_interval_secs: Option<u64>,

    /// Exit once nothing is claimable instead of polling
    #[arg(long)]
    pub exit_when_drained: bool,
}

#[derive(Args, Debug, Default)]
pub struct EnqueueArgs {
    /// Tasks as `symbol,expiration,date`; read from stdin when omitted
    #[arg(value_name = "TASK", conflicts_with = "discover")]
    pub tasks: Vec<String>,

    /// Ask the terminal for every expiration and quote date of SYMBOL (repeatable)
    #[arg(long, value_name = "SYMBOL")]
    pub discover: Vec<String>,

    /// With --discover, skip quote dates before this day (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", requires = "discover")]
    pub from: Option<NaiveDate>,

    /// With --discover, skip quote dates after this day (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", requires = "discover")]
    pub to: Option<NaiveDate>,

    /// ThetaData terminal base URL used by --discover
    #[arg(long, value_name = "URL")]
    pub api_base_url: Option<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also list tasks in this status (pending, in_progress, completed, failed)
    #[arg(long, value_name = "STATUS")]
    pub list: Option<TaskStatus>,

    /// Maximum tasks to list
    #[arg(long, default_value_t = 20, requires = "list")]
    pub limit: u32,

    /// Print counts as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["failed", "task"])))]
pub struct ResetArgs {
    /// Reset every terminally failed task
    #[arg(long)]
    pub failed: bool,

    /// Reset one task, given as `symbol,expiration,date`
    #[arg(value_name = "TASK")]
    pub task: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct ReclaimArgs {
    /// Seconds before an in-progress lease is considered abandoned
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=604_800))]
    pub lease_timeout_secs: Option<u64>,
}
