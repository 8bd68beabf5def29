//! Startup and periodic reclaim of abandoned leases.
//!
//! A worker killed mid-task leaves its row `in_progress`. Nothing else
//! notices: there is no heartbeat. Every worker process therefore sweeps
//! stale leases back to `pending` when it starts, and long-lived processes
//! can keep sweeping on a timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::LeaseCoordinator;
use crate::catalog::Result;

/// How often the periodic loop checks its stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Sweeps leases older than a configured timeout back to pending.
#[derive(Debug, Clone)]
pub struct Reclaimer {
    coordinator: LeaseCoordinator,
    lease_timeout: Duration,
}

impl Reclaimer {
    /// Creates a reclaimer. `lease_timeout` should exceed the slowest
    /// expected single task.
    #[must_use]
    pub fn new(coordinator: LeaseCoordinator, lease_timeout: Duration) -> Self {
        Self {
            coordinator,
            lease_timeout,
        }
    }

    /// Returns the configured lease timeout.
    #[must_use]
    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Runs one sweep and returns the number of leases reclaimed.
    ///
    /// # Errors
    ///
    /// Returns the coordinator error if the sweep transaction fails.
    #[instrument(skip(self), fields(lease_timeout_secs = self.lease_timeout.as_secs()))]
    pub async fn run_once(&self) -> Result<u64> {
        let reclaimed = self.coordinator.reclaim_stuck(self.lease_timeout).await?;
        if reclaimed == 0 {
            debug!("no stale leases");
        }
        Ok(reclaimed)
    }

    /// Spawns a task that sweeps every `every` until `stop` is set.
    ///
    /// The first sweep happens one period after spawning; run
    /// [`Reclaimer::run_once`] directly for the startup sweep. Sweep errors
    /// are logged and the loop keeps going.
    pub fn spawn_periodic(self, every: Duration, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let poll = STOP_POLL_INTERVAL.min(every);
            let mut next_sweep = Instant::now() + every;

            while !stop.load(Ordering::SeqCst) {
                tokio::time::sleep(poll).await;
                if Instant::now() < next_sweep {
                    continue;
                }
                next_sweep = Instant::now() + every;

                if let Err(err) = self.run_once().await {
                    warn!(error = %err, "periodic lease reclaim failed");
                }
            }
            debug!("periodic reclaimer stopped");
        })
    }
}
