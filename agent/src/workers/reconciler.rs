//! Reconciliation worker
//!
//! Runs a cycle at startup, then on every interval tick or manual trigger.
//! On shutdown the running cycle is cancelled and awaited.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::reconcile::cycle::{CycleResult, Reconciler};

/// Reconciliation worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,

    /// Run the first cycle without waiting for the interval
    pub run_on_startup: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            run_on_startup: true,
        }
    }
}

/// Run the reconciliation worker
pub async fn run<S, F>(
    options: &Options,
    reconciler: &Reconciler,
    trigger: &Notify,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Reconciliation worker starting...");

    let mut run_now = options.run_on_startup;
    loop {
        if run_now {
            let cycle = reconciler.run_cycle();
            tokio::pin!(cycle);

            let result = tokio::select! {
                result = &mut cycle => result,
                _ = &mut shutdown_signal => {
                    info!("Shutdown requested, cancelling the running cycle...");
                    reconciler.cancel();
                    let _ = cycle.await;
                    info!("Reconciliation worker shutting down...");
                    return;
                }
            };
            match result {
                Ok(CycleResult::Completed(summary)) => {
                    debug!(cycle = %summary.cycle_id, status = ?summary.status, "cycle completed")
                }
                Ok(CycleResult::Cancelled { cycle_id }) => debug!(cycle = %cycle_id, "cycle cancelled"),
                Err(e) => error!("Reconciliation cycle failed: {}", e),
            }
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Reconciliation worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
            _ = trigger.notified() => {
                info!("Reconciliation triggered manually");
            }
        }
        run_now = true;
    }
}
