//! Outcome reports waiting for delivery
//!
//! Reports are delivered at least once: an entry leaves the outbox only when
//! the cloud acknowledged it or rejected it permanently. The cloud
//! deduplicates retransmissions on the cycle id.

use openapi_client::models::ReconciliationOutcomeReport;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::http::channel::CloudChannel;

/// Result of a flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub delivered: usize,

    /// Rejected permanently by the cloud
    pub dropped: usize,

    pub remaining: usize,
}

/// Persistent FIFO of outcome reports
pub struct Outbox {
    file: File,
    capacity: usize,
    entries: Mutex<Vec<ReconciliationOutcomeReport>>,
}

impl Outbox {
    /// Open the outbox, starting empty when the file is missing or unreadable
    pub async fn load(file: File, capacity: usize) -> Self {
        let entries = if file.exists().await {
            match file.read_json::<Vec<ReconciliationOutcomeReport>>().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring unreadable outbox: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        if !entries.is_empty() {
            info!(pending = entries.len(), "Loaded undelivered outcome reports");
        }

        Self {
            file,
            capacity: capacity.max(1),
            entries: Mutex::new(entries),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn pending(&self) -> Vec<ReconciliationOutcomeReport> {
        self.entries.lock().await.clone()
    }

    /// Queue a report; the oldest entries go once capacity is exceeded
    pub async fn push(&self, report: ReconciliationOutcomeReport) -> Result<(), AgentError> {
        let mut entries = self.entries.lock().await;
        entries.push(report);
        if entries.len() > self.capacity {
            let overflow = entries.len() - self.capacity;
            warn!(dropped = overflow, "Outbox full, dropping oldest outcome reports");
            entries.drain(..overflow);
        }
        self.file.write_json(&*entries).await
    }

    /// Deliver queued reports in order, stopping at the first transient failure
    pub async fn flush(&self, channel: &dyn CloudChannel) -> FlushSummary {
        let mut entries = self.entries.lock().await;
        let mut summary = FlushSummary::default();
        if entries.is_empty() {
            return summary;
        }

        while let Some(queued) = entries.first_mut() {
            queued.attempt += 1;

            match channel.report_outcome(queued).await {
                Ok(ack) => {
                    debug!(
                        cycle = %queued.cycle_id,
                        attempt = queued.attempt,
                        duplicate = ack.duplicate,
                        "outcome report delivered"
                    );
                    entries.remove(0);
                    summary.delivered += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        cycle = %queued.cycle_id,
                        attempt = queued.attempt,
                        "Outcome report not delivered, will retry: {}",
                        e
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        cycle = %queued.cycle_id,
                        "Outcome report rejected, dropping it: {}",
                        e
                    );
                    entries.remove(0);
                    summary.dropped += 1;
                }
            }
        }

        summary.remaining = entries.len();
        if let Err(e) = self.file.write_json(&*entries).await {
            warn!("Failed to persist outbox: {}", e);
        }
        summary
    }
}
