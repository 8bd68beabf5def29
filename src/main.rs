//! CLI entry point for the harvester tool.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod app;
mod cli;
mod commands;

use app::config::load_config;
use app::settings;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Config verbosity feeds the log level, so load the file before tracing;
    // a broken file still gets reported after the subscriber is up.
    let loaded = load_config(cli.config.as_deref());
    let file_config = loaded
        .as_ref()
        .map(|loaded| loaded.config.clone())
        .unwrap_or_default();
    app::init_tracing(settings::resolve_default_log_level(&cli, &file_config));
    let loaded = loaded?;

    debug!(
        ?cli,
        config_path = ?loaded.path,
        loaded_from_file = loaded.loaded_from_file,
        config_verbosity = loaded.config.verbosity.map(|v| v.as_str()),
        "CLI arguments parsed"
    );

    let common = settings::resolve_common(&cli, &loaded.config);
    match &cli.command {
        Command::Work(args) => {
            let work = settings::resolve_work(&cli, args, &loaded.config)?;
            commands::run_work_command(work).await
        }
        Command::Enqueue(args) => {
            let discovery = settings::resolve_discovery(args, &loaded.config);
            commands::run_enqueue_command(&common, &discovery, args).await
        }
        Command::Status(args) => commands::run_status_command(&common, args).await,
        Command::Reset(args) => commands::run_reset_command(&common, args).await,
        Command::Reclaim(args) => {
            let lease_timeout = settings::resolve_reclaim_timeout(args, &loaded.config)?;
            commands::run_reclaim_command(&common, lease_timeout).await
        }
    }
}
