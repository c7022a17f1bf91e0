//! Rollout device assignment model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ControlError;
use crate::ids::{AssignmentId, DeviceId, PhaseId, RolloutId};

/// Assignment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    /// Created, desired state not yet written
    Pending,
    /// Desired state written for the device
    Assigned,
    /// The device picked the desired state up
    Reconciling,
    Succeeded,
    Failed,
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Succeeded | AssignmentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Reconciling => "reconciling",
            AssignmentStatus::Succeeded => "succeeded",
            AssignmentStatus::Failed => "failed",
        }
    }

    /// Whether `self -> to` is an adjacent edge
    pub fn can_transition_to(&self, to: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        matches!(
            (self, to),
            (Pending, Assigned)
                | (Pending, Failed)
                | (Assigned, Reconciling)
                | (Assigned, Failed)
                | (Reconciling, Succeeded)
                | (Reconciling, Failed)
        )
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binding of one device to one rollout phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutDeviceAssignment {
    pub id: AssignmentId,
    pub rollout_id: RolloutId,
    pub phase_id: PhaseId,
    pub phase_number: u32,
    pub device_id: DeviceId,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub reconciling_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    /// Free-form detail of the succeeding report
    pub detail: Option<String>,

    /// Cycle id of the report that drove the last transition
    pub last_cycle_id: Option<String>,
}

impl RolloutDeviceAssignment {
    pub fn new(
        rollout_id: RolloutId,
        phase_id: PhaseId,
        phase_number: u32,
        device_id: DeviceId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AssignmentId::generate(),
            rollout_id,
            phase_id,
            phase_number,
            device_id,
            status: AssignmentStatus::Pending,
            created_at: now,
            assigned_at: None,
            reconciling_at: None,
            finished_at: None,
            last_error: None,
            detail: None,
            last_cycle_id: None,
        }
    }

    /// Guarded status transition
    pub fn transition(
        &mut self,
        to: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ControlError> {
        if !self.status.can_transition_to(to) {
            return Err(ControlError::InvalidTransition {
                entity: format!("assignment {} ({})", self.id, self.device_id),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        match to {
            AssignmentStatus::Assigned => self.assigned_at = Some(now),
            AssignmentStatus::Reconciling => self.reconciling_at = Some(now),
            AssignmentStatus::Succeeded | AssignmentStatus::Failed => {
                self.finished_at = Some(now)
            }
            AssignmentStatus::Pending => {}
        }
        self.status = to;
        Ok(())
    }

    /// Time of the most recent transition
    pub fn last_transition_at(&self) -> DateTime<Utc> {
        self.finished_at
            .or(self.reconciling_at)
            .or(self.assigned_at)
            .unwrap_or(self.created_at)
    }

    /// In flight for longer than `window`
    pub fn is_stale(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        matches!(
            self.status,
            AssignmentStatus::Assigned | AssignmentStatus::Reconciling
        ) && now - self.last_transition_at() > window
    }
}
