//! `work`: reclaim stale leases, then run worker loops until interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use harvester_core::{
    Catalog, FsStorageWriter, LeaseCoordinator, Reclaimer, Retrieval, StorageWriter, ThetaClient,
    Worker, WorkerConfig, WorkerStats,
};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use super::open_database;
use crate::app::install_interrupt_flag;
use crate::app::progress::spawn_progress_reporter;
use crate::app::settings::WorkSettings;

pub(crate) async fn run_work_command(settings: WorkSettings) -> Result<()> {
    let db = open_database(&settings.common).await?;
    let coordinator = LeaseCoordinator::new(db.clone());
    let catalog = Catalog::new(db.clone());

    let reclaimer = Reclaimer::new(coordinator.clone(), settings.lease_timeout);
    reclaimer
        .run_once()
        .await
        .context("Startup lease reclaim failed")?;

    let retrieval: Arc<dyn Retrieval> = Arc::new(ThetaClient::new(
        &settings.api_base_url,
        settings.interval.clone(),
        settings.request_timeout,
    )?);
    let storage: Arc<dyn StorageWriter> = Arc::new(FsStorageWriter::new(
        &settings.data_dir,
        settings.interval.clone(),
    ));

    let interrupted = install_interrupt_flag();
    let stats = Arc::new(WorkerStats::new());

    let background_stop = Arc::new(AtomicBool::new(false));
    let reclaim_handle = settings
        .reclaim_interval
        .map(|every| reclaimer.spawn_periodic(every, Arc::clone(&background_stop)));
    let (progress_handle, progress_stop) =
        spawn_progress_reporter(settings.report_interval, catalog.clone(), Arc::clone(&stats));

    let config = WorkerConfig {
        max_retries: settings.max_retries,
        idle_interval: settings.idle_interval,
        exit_when_drained: settings.exit_when_drained,
    };
    info!(
        workers = settings.workers,
        max_retries = settings.max_retries,
        lease_timeout_secs = settings.lease_timeout.as_secs(),
        data_dir = %settings.data_dir.display(),
        api_base_url = %settings.api_base_url,
        "starting workers"
    );

    let mut workers = JoinSet::new();
    for index in 0..settings.workers {
        let worker = Worker::new(
            format!("worker-{index}"),
            coordinator.clone(),
            Arc::clone(&retrieval),
            Arc::clone(&storage),
            config.clone(),
        )
        .with_stats(Arc::clone(&stats));
        let interrupted = Arc::clone(&interrupted);
        workers.spawn(async move { worker.run(&interrupted).await });
    }

    // The first failing worker stops the rest; its error is the one reported.
    let mut first_error = None;
    while let Some(joined) = workers.join_next().await {
        let result = match joined {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(join_error) => Err(anyhow!("worker task aborted: {join_error}")),
        };
        if let Err(err) = result {
            error!(error = %err, "worker stopped with an error");
            interrupted.store(true, Ordering::SeqCst);
            first_error.get_or_insert(err);
        }
    }

    background_stop.store(true, Ordering::SeqCst);
    progress_stop.store(true, Ordering::SeqCst);
    join_background("reclaimer", reclaim_handle).await;
    join_background("progress reporter", progress_handle).await;

    let counts = catalog.count_by_status().await?;
    info!(
        completed = stats.completed(),
        requeued = stats.requeued(),
        failed = stats.failed(),
        abandoned = stats.abandoned(),
        pending = counts.pending,
        in_progress = counts.in_progress,
        "work finished"
    );
    db.close().await;

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Waits for a background task, logging a panic or cancellation instead of
/// dropping it. Returns `false` if the task did not finish cleanly.
async fn join_background(name: &'static str, handle: Option<JoinHandle<()>>) -> bool {
    let Some(handle) = handle else {
        return true;
    };
    match handle.await {
        Ok(()) => true,
        Err(err) => {
            warn!(task = name, error = %err, "background task failed");
            false
        }
    }
}
