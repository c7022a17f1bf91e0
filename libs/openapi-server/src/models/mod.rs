//! API models

use chrono::{DateTime, Utc};
use openapi_client::models::ContainerSpec;
use serde::{Deserialize, Serialize};

/// Bundle version registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterBundleVersionRequest {
    pub version: String,
    pub containers: Vec<ContainerSpec>,
}

/// Bundle version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleVersionResponse {
    pub tenant_id: String,
    pub bundle_id: String,
    pub version: String,
    pub checksum: String,
    pub containers: Vec<ContainerSpec>,
    pub created_at: DateTime<Utc>,
}

/// Which devices a rollout targets overall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceSelectorDto {
    Devices { ids: Vec<String> },
    Tags { query: String },
    All,
}

/// Which devices of the remaining population a phase takes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhaseSelectionDto {
    Devices { ids: Vec<String> },
    Percentage { percent: f64 },
    Tags { query: String },
}

/// One phase of a rollout plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePlanDto {
    pub selection: PhaseSelectionDto,
    pub completion_threshold: f64,
    pub failure_threshold: f64,
}

/// Start rollout request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRolloutRequest {
    pub bundle_id: String,
    pub version: String,
    #[serde(default)]
    pub previous_version: Option<String>,
    pub device_selector: DeviceSelectorDto,
    pub phases: Vec<PhasePlanDto>,
    #[serde(default)]
    pub auto_rollback: bool,
}

/// Per-status assignment counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCountsDto {
    pub pending: usize,
    pub assigned: usize,
    pub reconciling: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Phase status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseStatusDto {
    pub number: u32,
    pub status: String,
    pub devices: usize,
    pub counts: OutcomeCountsDto,
    pub completion_threshold: f64,
    pub failure_threshold: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Failure summary attached to a failed rollout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummaryDto {
    pub phase_number: u32,
    pub failing_devices: Vec<String>,
    pub errors: Vec<String>,
}

/// Rollout status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutStatusResponse {
    pub id: String,
    pub tenant_id: String,
    pub bundle_id: String,
    pub version: String,
    pub previous_version: Option<String>,
    pub status: String,
    pub kind: String,
    pub auto_rollback: bool,
    pub revision: u64,
    pub population: usize,
    pub phases: Vec<PhaseStatusDto>,
    pub stale_assignments: usize,
    pub failure: Option<FailureSummaryDto>,
    pub rollback_rollout_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rollout list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutListResponse {
    pub rollouts: Vec<RolloutStatusResponse>,
    pub total: usize,
}

/// Status of one device within a rollout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusDto {
    pub device_id: String,
    pub phase_number: u32,
    pub status: String,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub reported_bundle_version: Option<String>,
}

/// Per-device status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusListResponse {
    pub rollout_id: String,
    pub devices: Vec<DeviceStatusDto>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
