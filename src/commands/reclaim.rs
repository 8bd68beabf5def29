//! `reclaim`: one stuck-lease sweep, for cron or manual recovery.

use std::time::Duration;

use anyhow::Result;
use harvester_core::{LeaseCoordinator, Reclaimer};

use super::open_database;
use crate::app::settings::CommonSettings;

pub(crate) async fn run_reclaim_command(
    settings: &CommonSettings,
    lease_timeout: Duration,
) -> Result<()> {
    let db = open_database(settings).await?;
    let reclaimed = Reclaimer::new(LeaseCoordinator::new(db.clone()), lease_timeout)
        .run_once()
        .await?;
    db.close().await;

    println!(
        "Reclaimed {reclaimed} lease(s) older than {}s",
        lease_timeout.as_secs()
    );
    Ok(())
}
