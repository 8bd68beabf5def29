//! Binary-side plumbing: config, settings resolution, signals, reporting.

pub(crate) mod config;
pub(crate) mod progress;
pub(crate) mod settings;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Initializes the global subscriber.
/// Priority: `RUST_LOG` env var > the resolved default level.
pub(crate) fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns a flag that flips to true on the first Ctrl-C.
///
/// Workers finish their current task and exit; a second Ctrl-C kills the
/// process and leaves the lease for the reclaimer.
pub(crate) fn install_interrupt_flag() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current tasks (Ctrl-C again to abort)");
            interrupted_signal.store(true, Ordering::SeqCst);
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
    interrupted
}
