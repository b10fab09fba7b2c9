//! Tick-and-sleep scheduling for the long-running processes
//!
//! Every daemon runs one cycle at a time on a single task. A termination
//! signal never interrupts a cycle: it is observed between cycles, so the
//! in-flight cycle finishes and the loop exits. Errors from a cycle are
//! logged and the schedule continues.

use crate::common::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// A periodic process driven by [`run_daemon`].
pub trait Daemon {
    fn name(&self) -> &'static str;

    /// One scheduling cycle.
    fn tick(&mut self) -> impl Future<Output = Result<()>>;
}

/// Drive `daemon` every `period` until `shutdown` flips to `true`.
pub async fn run_daemon<D: Daemon>(
    mut daemon: D,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(daemon = daemon.name(), period_secs = period.as_secs(), "daemon started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = daemon.tick().await {
            if e.is_retryable() {
                tracing::warn!(daemon = daemon.name(), "cycle skipped: {}", e);
            } else {
                tracing::error!(daemon = daemon.name(), "cycle failed: {}", e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(daemon = daemon.name(), "daemon stopped");
}

/// A receiver that flips to `true` on SIGINT or SIGTERM.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("termination requested, finishing current cycle");
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
