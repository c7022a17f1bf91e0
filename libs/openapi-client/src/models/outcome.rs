//! Reconciliation outcome reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate result of a reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Every action succeeded (or there was nothing to do)
    Succeeded,
    /// Only optional containers failed
    Partial,
    /// At least one required action failed after retries
    Failed,
}

/// Kind of container action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Start,
    Stop,
}

/// Result of a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    /// Not attempted, e.g. the cycle was cancelled first
    Skipped,
}

/// Per-action detail of an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub action: ActionKind,
    pub container: String,
    pub image: String,
    pub status: ActionStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a reconciliation cycle, reported at least once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOutcomeReport {
    pub timestamp: DateTime<Utc>,

    /// Unique per cycle; the cloud deduplicates retransmissions on it
    pub cycle_id: String,

    /// Delivery attempt of this report
    pub attempt: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_number: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_version: Option<String>,

    pub status: OutcomeStatus,

    #[serde(default)]
    pub actions: Vec<ActionReport>,

    #[serde(default)]
    pub errors: Vec<String>,
}

/// Acknowledgement of a device report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAck {
    pub accepted: bool,

    /// The report had already been applied
    #[serde(default)]
    pub duplicate: bool,
}
