//! Rollout and phase state machines

use crate::errors::ControlError;
use crate::models::rollout::{PhaseStatus, RolloutStatus};

/// Rollout trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutTrigger {
    Start,
    Pause,
    Resume,

    /// Every phase completed or skipped
    Complete,

    /// The active phase failed
    Fail,

    /// The synthesized rollback rollout completed
    RollbackCompleted,
    Cancel,
}

impl RolloutTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutTrigger::Start => "start",
            RolloutTrigger::Pause => "pause",
            RolloutTrigger::Resume => "resume",
            RolloutTrigger::Complete => "complete",
            RolloutTrigger::Fail => "fail",
            RolloutTrigger::RollbackCompleted => "rollback_completed",
            RolloutTrigger::Cancel => "cancel",
        }
    }
}

/// Next rollout status, or `InvalidTransition`
pub fn next_status(
    from: RolloutStatus,
    trigger: RolloutTrigger,
) -> Result<RolloutStatus, ControlError> {
    use RolloutStatus::*;
    use RolloutTrigger::*;

    let to = match (from, trigger) {
        (Pending, Start) => InProgress,

        (InProgress, Pause) => Paused,
        (Paused, Resume) => InProgress,

        (InProgress, Complete) => Completed,
        (InProgress, Fail) => Failed,

        (Failed, RollbackCompleted) => RolledBack,

        (Pending | InProgress | Paused, Cancel) => Cancelled,

        (from, trigger) => {
            return Err(ControlError::InvalidTransition {
                entity: "rollout".to_string(),
                from: from.to_string(),
                to: trigger.as_str().to_string(),
            });
        }
    };
    Ok(to)
}

/// Phase trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTrigger {
    Start,
    Skip,
    Complete,
    Fail,
}

pub fn next_phase_status(
    from: PhaseStatus,
    trigger: PhaseTrigger,
) -> Result<PhaseStatus, ControlError> {
    let to = match (from, trigger) {
        (PhaseStatus::Pending, PhaseTrigger::Start) => PhaseStatus::InProgress,
        (PhaseStatus::Pending, PhaseTrigger::Skip) => PhaseStatus::Skipped,
        (PhaseStatus::InProgress, PhaseTrigger::Complete) => PhaseStatus::Completed,
        (PhaseStatus::InProgress, PhaseTrigger::Fail) => PhaseStatus::Failed,
        (from, trigger) => {
            return Err(ControlError::InvalidTransition {
                entity: "phase".to_string(),
                from: from.to_string(),
                to: format!("{:?}", trigger).to_lowercase(),
            });
        }
    };
    Ok(to)
}
