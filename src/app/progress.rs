//! Periodic status report for long-running `work` processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use harvester_core::{Catalog, WorkerStats};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

const STOP_POLL: Duration = Duration::from_millis(200);

/// Spawns the reporter when an interval is configured.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `every` is `None`, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_reporter(
    every: Option<Duration>,
    catalog: Catalog,
    stats: Arc<WorkerStats>,
) -> (Option<JoinHandle<()>>, Arc<AtomicBool>) {
    let Some(every) = every else {
        return (None, Arc::new(AtomicBool::new(true)));
    };
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_reporter_inner(every, catalog, stats, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_reporter_inner(
    every: Duration,
    catalog: Catalog,
    stats: Arc<WorkerStats>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut next_report = Instant::now() + every;
        while !stop.load(Ordering::SeqCst) {
            tokio::time::sleep(STOP_POLL.min(every)).await;
            if Instant::now() < next_report {
                continue;
            }
            next_report = Instant::now() + every;

            match catalog.count_by_status().await {
                Ok(counts) => info!(
                    pending = counts.pending,
                    in_progress = counts.in_progress,
                    completed = counts.completed,
                    failed = counts.failed,
                    session_completed = stats.completed(),
                    session_requeued = stats.requeued(),
                    session_failed = stats.failed(),
                    session_abandoned = stats.abandoned(),
                    "progress"
                ),
                Err(err) => warn!(error = %err, "failed to read status counts"),
            }
        }
    })
}
