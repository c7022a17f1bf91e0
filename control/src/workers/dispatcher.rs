//! Event dispatch worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::events::dispatcher::EventDispatcher;

/// Dispatch worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Retry interval for sinks that failed, when nothing new is appended
    pub interval: Duration,

    /// Delivered events kept in memory for the events endpoint
    pub retained_events: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            retained_events: 10_000,
        }
    }
}

/// Run the dispatch worker; wakes on every append and on a fixed interval
pub async fn run<S, F>(
    options: &Options,
    dispatcher: &EventDispatcher,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Event dispatch worker starting...");

    loop {
        let delivered = dispatcher.dispatch_pending().await;
        if delivered > 0 {
            debug!(delivered, "dispatched rollout events");
            dispatcher.compact(options.retained_events);
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                // Flush what was appended during shutdown
                dispatcher.dispatch_pending().await;
                info!("Event dispatch worker shutting down...");
                return;
            }
            _ = dispatcher.log().appended() => {}
            _ = sleep_fn(options.interval) => {}
        }
    }
}
