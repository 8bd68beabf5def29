//! Effective settings: command line over config file over built-in default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use harvester_core::DatabaseOptions;
use harvester_core::retrieval::{DEFAULT_BASE_URL, DEFAULT_INTERVAL};
use harvester_core::worker::DEFAULT_IDLE_INTERVAL;

use super::config::{FileConfig, VerbositySetting, is_valid_interval};
use crate::cli::{Cli, EnqueueArgs, ReclaimArgs, WorkArgs};

const DEFAULT_DATABASE_PATH: &str = "database/theta_options.db";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 60;
const DEFAULT_WORKERS: u32 = 1;

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub(crate) struct CommonSettings {
    pub(crate) database_path: PathBuf,
    pub(crate) db_options: DatabaseOptions,
}

/// Settings for `work`.
#[derive(Debug, Clone)]
pub(crate) struct WorkSettings {
    pub(crate) common: CommonSettings,
    pub(crate) data_dir: PathBuf,
    pub(crate) api_base_url: String,
    pub(crate) interval: String,
    pub(crate) max_retries: u32,
    pub(crate) lease_timeout: Duration,
    pub(crate) idle_interval: Duration,
    /// `None` when periodic reclaim is disabled.
    pub(crate) reclaim_interval: Option<Duration>,
    /// `None` when periodic reporting is disabled.
    pub(crate) report_interval: Option<Duration>,
    pub(crate) request_timeout: Duration,
    pub(crate) workers: u32,
    pub(crate) exit_when_drained: bool,
}

/// Terminal connection for `enqueue --discover`.
#[derive(Debug, Clone)]
pub(crate) struct DiscoverySettings {
    pub(crate) api_base_url: String,
    pub(crate) request_timeout: Duration,
}

pub(crate) fn resolve_common(cli: &Cli, file: &FileConfig) -> CommonSettings {
    let defaults = DatabaseOptions::default();
    CommonSettings {
        database_path: cli
            .db
            .clone()
            .or_else(|| file.database_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
        db_options: DatabaseOptions {
            max_connections: file.db_max_connections.unwrap_or(defaults.max_connections),
            busy_timeout_ms: file.db_busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
        },
    }
}

pub(crate) fn resolve_work(cli: &Cli, args: &WorkArgs, file: &FileConfig) -> Result<WorkSettings> {
    let interval = args
        .interval
        .clone()
        .or_else(|| file.interval.clone())
        .unwrap_or_else(|| DEFAULT_INTERVAL.to_string());
    if !is_valid_interval(&interval) {
        bail!("Invalid interval '{interval}'. Expected a number followed by ms, s, m or h (e.g. 5s)");
    }

    let secs_or_disabled = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    Ok(WorkSettings {
        common: resolve_common(cli, file),
        data_dir: args
            .data_dir
            .clone()
            .or_else(|| file.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
        api_base_url: args
            .api_base_url
            .clone()
            .or_else(|| file.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        interval,
        max_retries: require_max_retries(args.max_retries, file)?,
        lease_timeout: require_lease_timeout(args.lease_timeout_secs, file)?,
        idle_interval: args
            .idle_interval_ms
            .or(file.idle_interval_ms)
            .map_or(DEFAULT_IDLE_INTERVAL, Duration::from_millis),
        reclaim_interval: args
            .reclaim_interval_secs
            .or(file.reclaim_interval_secs)
            .and_then(secs_or_disabled),
        report_interval: secs_or_disabled(
            file.report_interval_secs
                .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS),
        ),
        request_timeout: Duration::from_secs(
            file.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        ),
        workers: args.workers.or(file.workers).unwrap_or(DEFAULT_WORKERS),
        exit_when_drained: args.exit_when_drained,
    })
}

pub(crate) fn resolve_discovery(args: &EnqueueArgs, file: &FileConfig) -> DiscoverySettings {
    DiscoverySettings {
        api_base_url: args
            .api_base_url
            .clone()
            .or_else(|| file.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        request_timeout: Duration::from_secs(
            file.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        ),
    }
}

pub(crate) fn resolve_reclaim_timeout(args: &ReclaimArgs, file: &FileConfig) -> Result<Duration> {
    require_lease_timeout(args.lease_timeout_secs, file)
}

fn require_max_retries(cli: Option<u32>, file: &FileConfig) -> Result<u32> {
    let Some(max_retries) = cli.or(file.max_retries) else {
        bail!(
            "max_retries is not configured.\n  Suggestion: pass --max-retries N or set `max_retries = N` in the config file"
        );
    };
    Ok(max_retries)
}

fn require_lease_timeout(cli: Option<u64>, file: &FileConfig) -> Result<Duration> {
    let Some(secs) = cli.or(file.lease_timeout_secs) else {
        bail!(
            "lease timeout is not configured.\n  Suggestion: pass --lease-timeout-secs N or set `lease_timeout_secs = N` in the config file; it must exceed the slowest single download"
        );
    };
    Ok(Duration::from_secs(secs))
}

/// Default log level. Priority: quiet flag > verbose flags > config verbosity > info.
pub(crate) fn resolve_default_log_level(cli: &Cli, file: &FileConfig) -> &'static str {
    if cli.quiet {
        return "error";
    }
    match cli.verbose {
        0 => {}
        1 => return "debug",
        _ => return "trace",
    }
    match file.verbosity {
        Some(VerbositySetting::Quiet) => "error",
        Some(VerbositySetting::Verbose | VerbositySetting::Debug) => "debug",
        Some(VerbositySetting::Default) | None => "info",
    }
}
