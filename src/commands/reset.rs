//! `reset`: operator recovery for failed or misbehaving tasks.

use anyhow::{Context, Result};
use harvester_core::{Catalog, TaskKey};

use super::open_database;
use crate::app::settings::CommonSettings;
use crate::cli::ResetArgs;

pub(crate) async fn run_reset_command(settings: &CommonSettings, args: &ResetArgs) -> Result<()> {
    let key = args
        .task
        .as_deref()
        .map(str::parse::<TaskKey>)
        .transpose()
        .context("Invalid task argument")?;

    let db = open_database(settings).await?;
    let catalog = Catalog::new(db.clone());

    if let Some(key) = key {
        catalog.reset_task(&key).await?;
        println!("Reset {key} to pending");
    } else {
        let reset = catalog.reset_failed().await?;
        println!("Reset {reset} failed task(s) to pending");
    }

    db.close().await;
    Ok(())
}
