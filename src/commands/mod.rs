//! CLI command handlers.

mod enqueue;
mod reclaim;
mod reset;
mod status;
mod work;

pub(crate) use enqueue::run_enqueue_command;
pub(crate) use reclaim::run_reclaim_command;
pub(crate) use reset::run_reset_command;
pub(crate) use status::run_status_command;
pub(crate) use work::run_work_command;

use anyhow::{Context, Result};
use harvester_core::Database;
use tracing::debug;

use crate::app::settings::CommonSettings;

async fn open_database(settings: &CommonSettings) -> Result<Database> {
    debug!(path = %settings.database_path.display(), "opening task catalog");
    Database::new_with_options(&settings.database_path, settings.db_options)
        .await
        .with_context(|| {
            format!(
                "Failed to open task catalog '{}'",
                settings.database_path.display()
            )
        })
}
