//! Periodic re-evaluation of in-progress rollouts
//!
//! Outcome reports already drive advancement; the sweeper catches rollouts
//! whose evidence changed without a report and logs stale assignments.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::rollout::orchestrator::RolloutOrchestrator;

/// Sweeper worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Advance every in-progress rollout once; returns how many were visited
pub async fn sweep(orchestrator: &RolloutOrchestrator) -> usize {
    let active = orchestrator.active_rollouts().await;
    for id in &active {
        match orchestrator.advance_phase_if_ready(id).await {
            Ok(snapshot) if snapshot.stale_assignments > 0 => {
                warn!(
                    rollout = %id,
                    stale = snapshot.stale_assignments,
                    "rollout has stale device assignments"
                );
            }
            Ok(_) => {}
            Err(e) => error!(rollout = %id, "Failed to advance rollout: {}", e),
        }
    }
    active.len()
}

/// Run the sweeper worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &RolloutOrchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Sweeper worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Sweeper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let visited = sweep(orchestrator).await;
        debug!(rollouts = visited, "sweep finished");
    }
}
