//! Rollout and phase models

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::errors::ControlError;
use crate::ids::{DeviceId, PhaseId, RolloutId, TenantId};
use crate::models::bundle::BundleKey;

/// Rollout lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

impl RolloutStatus {
    /// Holds device claims and accepts outcomes
    pub fn is_active(&self) -> bool {
        matches!(self, RolloutStatus::InProgress | RolloutStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutStatus::Pending => "pending",
            RolloutStatus::InProgress => "in_progress",
            RolloutStatus::Paused => "paused",
            RolloutStatus::Completed => "completed",
            RolloutStatus::Failed => "failed",
            RolloutStatus::RolledBack => "rolled_back",
            RolloutStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::Skipped
        )
    }

    /// Lets the next phase start
    pub fn is_passed(&self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the rollout is a regular one or synthesized to revert another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutKind {
    Standard,
    Rollback { of: RolloutId },
}

impl RolloutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutKind::Standard => "standard",
            RolloutKind::Rollback { .. } => "rollback",
        }
    }
}

/// The device population of a rollout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceSelector {
    Devices(Vec<DeviceId>),
    Tags(String),
    All,
}

impl DeviceSelector {
    pub fn validate(&self) -> Result<(), ControlError> {
        match self {
            DeviceSelector::Devices(ids) if ids.is_empty() => Err(ControlError::Validation(
                "device selector lists no devices".to_string(),
            )),
            DeviceSelector::Tags(query) if query.trim().is_empty() => Err(
                ControlError::Validation("device selector tag query is empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// How a phase picks devices out of the remaining population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhaseSelection {
    Devices(Vec<DeviceId>),
    /// Percent (0, 100] of the devices not yet assigned
    Percentage(f64),
    Tags(String),
}

/// Operator supplied definition of a phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePlan {
    pub selection: PhaseSelection,

    /// Minimum fraction of devices that must succeed
    pub completion_threshold: f64,

    /// Maximum fraction of devices that may fail
    pub failure_threshold: f64,
}

impl PhasePlan {
    pub fn new(selection: PhaseSelection, completion_threshold: f64, failure_threshold: f64) -> Self {
        Self {
            selection,
            completion_threshold,
            failure_threshold,
        }
    }

    pub fn validate(&self, number: u32) -> Result<(), ControlError> {
        for (name, value) in [
            ("completion_threshold", self.completion_threshold),
            ("failure_threshold", self.failure_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ControlError::Validation(format!(
                    "phase {}: {} {} is outside [0, 1]",
                    number, name, value
                )));
            }
        }

        match &self.selection {
            PhaseSelection::Devices(ids) if ids.is_empty() => Err(ControlError::Validation(
                format!("phase {}: explicit device list is empty", number),
            )),
            PhaseSelection::Percentage(pct) if !(*pct > 0.0 && *pct <= 100.0) => {
                Err(ControlError::Validation(format!(
                    "phase {}: percentage {} is outside (0, 100]",
                    number, pct
                )))
            }
            PhaseSelection::Tags(query) if query.trim().is_empty() => Err(
                ControlError::Validation(format!("phase {}: tag query is empty", number)),
            ),
            _ => Ok(()),
        }
    }
}

/// A stage of a rollout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutPhase {
    pub id: PhaseId,
    pub number: u32,
    pub plan: PhasePlan,
    pub status: PhaseStatus,

    /// Concrete device set, fixed once resolved at phase start
    pub devices: Vec<DeviceId>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RolloutPhase {
    pub fn new(number: u32, plan: PhasePlan) -> Self {
        Self {
            id: PhaseId::generate(),
            number,
            plan,
            status: PhaseStatus::Pending,
            devices: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Evidence kept when a phase fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub phase_number: u32,
    pub failing_devices: Vec<DeviceId>,
    pub errors: Vec<String>,
}

/// Orchestration run delivering one bundle version to a device population
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rollout {
    pub id: RolloutId,
    pub tenant_id: TenantId,

    /// Target bundle version
    pub bundle: BundleKey,
    pub previous_version: Option<Version>,
    pub status: RolloutStatus,
    pub kind: RolloutKind,
    pub auto_rollback: bool,

    /// Every device the rollout may touch, resolved at start
    pub population: Vec<DeviceId>,
    pub phases: Vec<RolloutPhase>,

    /// Incremented on every state change
    pub revision: u64,
    pub failure: Option<FailureSummary>,
    pub rollback_rollout_id: Option<RolloutId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rollout {
    /// Index of the phase currently in progress
    pub fn active_phase_index(&self) -> Option<usize> {
        self.phases
            .iter()
            .position(|p| p.status == PhaseStatus::InProgress)
    }

    /// Key of the version a rollback returns to
    pub fn previous_bundle(&self) -> Option<BundleKey> {
        self.previous_version.as_ref().map(|version| BundleKey {
            tenant_id: self.bundle.tenant_id.clone(),
            bundle_id: self.bundle.bundle_id.clone(),
            version: version.clone(),
        })
    }

    /// Devices already placed in some phase
    pub fn assigned_devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.phases.iter().flat_map(|p| p.devices.iter())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        self.updated_at = now;
    }
}
