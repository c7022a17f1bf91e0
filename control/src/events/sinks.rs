//! Event subscribers

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::errors::ControlError;
use crate::events::log::RolloutEvent;

/// A subscriber of the rollout event log
///
/// Delivery is at-least-once: a sink may see the same event again after a
/// failed delivery, so implementations dedupe on `(rollout_id, seq)`.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &RolloutEvent) -> Result<(), ControlError>;
}

/// Writes every event to the tracing log
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn deliver(&self, event: &RolloutEvent) -> Result<(), ControlError> {
        info!(
            rollout = %event.rollout_id,
            tenant = %event.tenant_id,
            seq = event.seq,
            event = event.kind.name(),
            details = %serde_json::to_string(&event.kind)?,
            "rollout event"
        );
        Ok(())
    }
}

/// Forwards events into a tokio channel
pub struct ChannelSink {
    name: String,
    tx: mpsc::UnboundedSender<RolloutEvent>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<RolloutEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &RolloutEvent) -> Result<(), ControlError> {
        self.tx
            .send(event.clone())
            .map_err(|_| ControlError::Internal(format!("event channel '{}' closed", self.name)))
    }
}
