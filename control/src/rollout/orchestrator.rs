//! Rollout orchestration
//!
//! Every transition of one rollout runs under that rollout's async mutex, so
//! advancement is linearized per rollout while different rollouts proceed in
//! parallel. Device claims (at most one active rollout per device) live in a
//! separate lock that is never held across an await point.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use openapi_client::models::OutcomeStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::desired::computer::{DeploymentTarget, DesiredStateComputer};
use crate::errors::ControlError;
use crate::events::log::{EventLog, RolloutEventKind};
use crate::fleet::directory::DeviceDirectory;
use crate::ids::{BundleId, DeviceId, RolloutId, TenantId};
use crate::models::assignment::{AssignmentStatus, RolloutDeviceAssignment};
use crate::models::bundle::BundleKey;
use crate::models::rollout::{
    DeviceSelector, FailureSummary, PhasePlan, PhaseSelection, PhaseStatus, Rollout, RolloutKind,
    RolloutPhase, RolloutStatus,
};
use crate::registry::bundles::BundleVersionRegistry;
use crate::rollout::fsm::{next_phase_status, next_status, PhaseTrigger, RolloutTrigger};
use crate::tracker::assignments::{resolve_selection, DeviceAssignmentTracker, OutcomeCounts};

/// Failure reason of devices that left the fleet before their phase started
pub const DEVICE_UNAVAILABLE: &str = "device unavailable";

/// What to do when a new rollout targets devices another rollout holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Reject,
    Supersede,
}

/// Devices a synthesized rollback reverts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    /// Every device that received an assignment
    #[default]
    Touched,
    /// Only the devices of the failed phase
    FailedPhase,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub conflict_policy: ConflictPolicy,
    pub rollback_scope: RollbackScope,

    /// Assigned or Reconciling for longer than this counts as stale
    pub stale_after: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::Reject,
            rollback_scope: RollbackScope::Touched,
            stale_after: Duration::from_secs(600),
        }
    }
}

/// Operator request to start a rollout
#[derive(Debug, Clone)]
pub struct StartRollout {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub version: String,
    pub previous_version: Option<String>,
    pub device_selector: DeviceSelector,
    pub phases: Vec<PhasePlan>,
    pub auto_rollback: bool,
}

/// A device's reported result for its assignment
#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    pub status: OutcomeStatus,
    pub cycle_id: String,
    pub phase_number: Option<u32>,
    pub errors: Vec<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeAck {
    /// The report restated an outcome that was already recorded
    pub duplicate: bool,
}

/// Point-in-time view of a rollout
#[derive(Debug, Clone)]
pub struct RolloutSnapshot {
    pub rollout: Rollout,

    /// Outcome counts, index-aligned with `rollout.phases`
    pub phase_counts: Vec<OutcomeCounts>,
    pub stale_assignments: usize,
}

/// Work that needs another rollout's lock, run after the current one drops
#[derive(Debug)]
enum FollowUp {
    BeginRollback(RolloutId),
    RolledBack { original: RolloutId, by: RolloutId },
}

enum PhaseVerdict {
    Waiting,
    Completed,
    Failed,
}

pub struct RolloutOrchestrator {
    options: OrchestratorOptions,
    registry: Arc<BundleVersionRegistry>,
    directory: Arc<dyn DeviceDirectory>,
    tracker: Arc<DeviceAssignmentTracker>,
    desired: Arc<DesiredStateComputer>,
    events: Arc<EventLog>,
    rollouts: RwLock<HashMap<RolloutId, Arc<Mutex<Rollout>>>>,
    claims: StdMutex<HashMap<DeviceId, RolloutId>>,
}

impl RolloutOrchestrator {
    pub fn new(
        options: OrchestratorOptions,
        registry: Arc<BundleVersionRegistry>,
        directory: Arc<dyn DeviceDirectory>,
        tracker: Arc<DeviceAssignmentTracker>,
        desired: Arc<DesiredStateComputer>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            options,
            registry,
            directory,
            tracker,
            desired,
            events,
            rollouts: RwLock::new(HashMap::new()),
            claims: StdMutex::new(HashMap::new()),
        }
    }

    // ============================= COMMANDS ================================ //

    /// Validate the request, claim the population and start phase 1
    pub async fn start_rollout(&self, request: StartRollout) -> Result<RolloutSnapshot, ControlError> {
        let target = BundleKey {
            tenant_id: request.tenant_id.clone(),
            bundle_id: request.bundle_id.clone(),
            version: BundleVersionRegistry::parse_version(&request.version)?,
        };
        self.registry.get(&target)?;

        request.device_selector.validate()?;
        if request.phases.is_empty() {
            return Err(ControlError::Validation("rollout has no phases".to_string()));
        }
        for (index, plan) in request.phases.iter().enumerate() {
            plan.validate(index as u32 + 1)?;
        }

        let previous_version = match &request.previous_version {
            Some(raw) => {
                let version = BundleVersionRegistry::parse_version(raw)?;
                if version == target.version {
                    return Err(ControlError::Validation(
                        "previous version equals the target version".to_string(),
                    ));
                }
                self.registry.get(&BundleKey {
                    version: version.clone(),
                    ..target.clone()
                })?;
                Some(version)
            }
            None => self
                .registry
                .highest_below(&target.tenant_id, &target.bundle_id, &target.version)
                .map(|bundle| bundle.version.clone()),
        };
        if request.auto_rollback && previous_version.is_none() {
            return Err(ControlError::Validation(format!(
                "auto rollback requested but {} has no previous version",
                target
            )));
        }

        let population = self
            .resolve_population(&request.tenant_id, &request.device_selector)
            .await?;

        let now = Utc::now();
        let rollout = Rollout {
            id: RolloutId::generate(),
            tenant_id: request.tenant_id,
            bundle: target,
            previous_version,
            status: RolloutStatus::Pending,
            kind: RolloutKind::Standard,
            auto_rollback: request.auto_rollback,
            population,
            phases: request
                .phases
                .into_iter()
                .enumerate()
                .map(|(index, plan)| RolloutPhase::new(index as u32 + 1, plan))
                .collect(),
            revision: 0,
            failure: None,
            rollback_rollout_id: None,
            created_at: now,
            updated_at: now,
        };

        let id = rollout.id.clone();
        let handle = Arc::new(Mutex::new(rollout));
        let mut guard = handle.lock().await;
        self.insert_handle(id.clone(), handle.clone());
        if let Err(e) = self.claim_population(&guard).await {
            self.remove_handle(&id);
            return Err(e);
        }

        info!(
            rollout = %id,
            tenant = %guard.tenant_id,
            bundle = %guard.bundle,
            devices = guard.population.len(),
            phases = guard.phases.len(),
            "starting rollout"
        );
        let follow_ups = self.begin(&mut guard).await?;
        let snapshot = self.snapshot(&guard);
        drop(guard);

        self.apply_follow_ups(follow_ups).await?;
        Ok(snapshot)
    }

    pub async fn pause_rollout(&self, id: &RolloutId) -> Result<RolloutSnapshot, ControlError> {
        let handle = self.handle(id)?;
        let mut rollout = handle.lock().await;
        self.transition(&mut rollout, RolloutTrigger::Pause)?;
        self.emit(&rollout, RolloutEventKind::Paused);
        info!(rollout = %id, "rollout paused");
        Ok(self.snapshot(&rollout))
    }

    /// Resume and immediately evaluate whatever was recorded while paused
    pub async fn resume_rollout(&self, id: &RolloutId) -> Result<RolloutSnapshot, ControlError> {
        let handle = self.handle(id)?;
        let mut rollout = handle.lock().await;
        self.transition(&mut rollout, RolloutTrigger::Resume)?;
        self.emit(&rollout, RolloutEventKind::Resumed);
        info!(rollout = %id, "rollout resumed");

        let follow_ups = self.drive(&mut rollout).await?;
        let snapshot = self.snapshot(&rollout);
        drop(rollout);

        self.apply_follow_ups(follow_ups).await?;
        Ok(snapshot)
    }

    pub async fn cancel_rollout(&self, id: &RolloutId) -> Result<RolloutSnapshot, ControlError> {
        let handle = self.handle(id)?;
        let mut rollout = handle.lock().await;
        self.cancel_locked(&mut rollout, None)?;
        Ok(self.snapshot(&rollout))
    }

    /// Evaluate the active phase and advance, fail or complete as warranted
    ///
    /// Safe to call any number of times and concurrently: a rollout that is
    /// not ready, or not in progress, is returned unchanged.
    pub async fn advance_phase_if_ready(
        &self,
        id: &RolloutId,
    ) -> Result<RolloutSnapshot, ControlError> {
        let handle = self.handle(id)?;
        let mut rollout = handle.lock().await;
        let follow_ups = self.drive(&mut rollout).await?;
        let snapshot = self.snapshot(&rollout);
        drop(rollout);

        self.apply_follow_ups(follow_ups).await?;
        Ok(snapshot)
    }

    /// Record a device's reported outcome and re-evaluate the rollout
    pub async fn record_device_outcome(
        &self,
        id: &RolloutId,
        device_id: &DeviceId,
        outcome: DeviceOutcome,
    ) -> Result<OutcomeAck, ControlError> {
        let handle = self.handle(id)?;
        let mut rollout = handle.lock().await;

        let assignment = self.tracker.find(id, device_id).ok_or_else(|| {
            ControlError::NotFound(format!("device {} has no assignment in rollout {}", device_id, id))
        })?;
        if let Some(phase_number) = outcome.phase_number {
            if phase_number != assignment.phase_number {
                return Err(ControlError::conflict(format!(
                    "device {} reported for phase {} but is assigned to phase {}",
                    device_id, phase_number, assignment.phase_number
                )));
            }
        }

        let succeeded = matches!(outcome.status, OutcomeStatus::Succeeded | OutcomeStatus::Partial);
        if assignment.status.is_terminal() {
            if (assignment.status == AssignmentStatus::Succeeded) == succeeded {
                debug!(
                    rollout = %id,
                    device = %device_id,
                    cycle = %outcome.cycle_id,
                    "duplicate outcome report"
                );
                return Ok(OutcomeAck { duplicate: true });
            }
            return Err(ControlError::Conflict {
                message: format!(
                    "outcome {:?} contradicts terminal assignment status {}",
                    outcome.status, assignment.status
                ),
                details: Some(serde_json::json!({
                    "device_id": device_id,
                    "assignment_status": assignment.status,
                    "reported_status": outcome.status,
                })),
            });
        }

        let now = Utc::now();
        if assignment.status == AssignmentStatus::Assigned {
            self.tracker.mark_reconciling(&assignment.id, now)?;
        }

        let active = rollout.status.is_active();
        if succeeded {
            self.tracker.mark_succeeded(
                &assignment.id,
                outcome.detail.clone(),
                Some(outcome.cycle_id.clone()),
                now,
            )?;
            if active {
                self.desired.record_success(
                    device_id,
                    DeploymentTarget {
                        bundle: rollout.bundle.clone(),
                        rollout_id: id.clone(),
                        phase_number: assignment.phase_number,
                    },
                );
                self.desired.recompute(device_id, None)?;
            }
        } else {
            let reason = if outcome.errors.is_empty() {
                "reconciliation failed".to_string()
            } else {
                outcome.errors.join("; ")
            };
            self.tracker
                .mark_failed(&assignment.id, reason, Some(outcome.cycle_id.clone()), now)?;
            if active {
                self.desired.recompute(device_id, None)?;
            }
        }

        info!(
            rollout = %id,
            device = %device_id,
            phase = assignment.phase_number,
            outcome = ?outcome.status,
            "recorded device outcome"
        );
        rollout.touch(now);

        let follow_ups = self.drive(&mut rollout).await?;
        drop(rollout);
        self.apply_follow_ups(follow_ups).await?;
        Ok(OutcomeAck { duplicate: false })
    }

    /// The device fetched a desired state carrying this rollout's assignment
    pub async fn note_desired_state_delivered(
        &self,
        device_id: &DeviceId,
        id: &RolloutId,
    ) -> Result<(), ControlError> {
        let Ok(handle) = self.handle(id) else {
            return Ok(());
        };
        let rollout = handle.lock().await;
        if !rollout.status.is_active() {
            return Ok(());
        }

        if let Some(assignment) = self.tracker.find(id, device_id) {
            if assignment.status == AssignmentStatus::Assigned {
                self.tracker.mark_reconciling(&assignment.id, Utc::now())?;
                debug!(rollout = %id, device = %device_id, "device picked up its assignment");
            }
        }
        Ok(())
    }

    // ============================== QUERIES ================================ //

    pub async fn rollout_status(&self, id: &RolloutId) -> Result<RolloutSnapshot, ControlError> {
        let handle = self.handle(id)?;
        let rollout = handle.lock().await;
        Ok(self.snapshot(&rollout))
    }

    pub async fn device_statuses(
        &self,
        id: &RolloutId,
    ) -> Result<Vec<RolloutDeviceAssignment>, ControlError> {
        self.handle(id)?;
        let mut assignments = self.tracker.rollout_assignments(id);
        assignments.sort_by(|a, b| {
            (a.phase_number, &a.device_id).cmp(&(b.phase_number, &b.device_id))
        });
        Ok(assignments)
    }

    /// Rollouts of a tenant, newest first
    pub async fn list_rollouts(&self, tenant_id: &TenantId) -> Vec<RolloutSnapshot> {
        let mut snapshots = Vec::new();
        for handle in self.handles() {
            let rollout = handle.lock().await;
            if &rollout.tenant_id == tenant_id {
                snapshots.push(self.snapshot(&rollout));
            }
        }
        snapshots.sort_by(|a, b| b.rollout.created_at.cmp(&a.rollout.created_at));
        snapshots
    }

    /// Ids of rollouts currently in progress
    pub async fn active_rollouts(&self) -> Vec<RolloutId> {
        let mut active = Vec::new();
        for handle in self.handles() {
            let rollout = handle.lock().await;
            if rollout.status == RolloutStatus::InProgress {
                active.push(rollout.id.clone());
            }
        }
        active
    }

    /// Rollout currently holding a device, if any
    pub fn claim_of(&self, device_id: &DeviceId) -> Option<RolloutId> {
        let claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims.get(device_id).cloned()
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    // =============================== DRIVING =============================== //

    async fn begin(&self, rollout: &mut Rollout) -> Result<Vec<FollowUp>, ControlError> {
        self.transition(rollout, RolloutTrigger::Start)?;
        self.emit(
            rollout,
            RolloutEventKind::Started {
                bundle: rollout.bundle.to_string(),
                population: rollout.population.len(),
            },
        );
        self.drive(rollout).await
    }

    /// Move an in-progress rollout as far as the recorded evidence allows
    async fn drive(&self, rollout: &mut Rollout) -> Result<Vec<FollowUp>, ControlError> {
        let mut follow_ups = Vec::new();
        while rollout.status == RolloutStatus::InProgress {
            match rollout.active_phase_index() {
                None => {
                    if !self.start_next_phase(rollout).await? {
                        self.complete(rollout, &mut follow_ups)?;
                    }
                }
                Some(index) => match self.evaluate_phase(&rollout.phases[index]) {
                    PhaseVerdict::Waiting => break,
                    PhaseVerdict::Completed => self.complete_phase(rollout, index)?,
                    PhaseVerdict::Failed => self.fail(rollout, index, &mut follow_ups).await?,
                },
            }
        }
        Ok(follow_ups)
    }

    fn evaluate_phase(&self, phase: &RolloutPhase) -> PhaseVerdict {
        let counts = self.tracker.counts(&phase.id);
        if counts.failure_fraction() > phase.plan.failure_threshold {
            return PhaseVerdict::Failed;
        }
        if counts.in_flight() > 0 {
            return PhaseVerdict::Waiting;
        }
        if counts.success_fraction() >= phase.plan.completion_threshold {
            PhaseVerdict::Completed
        } else {
            // Every device reported and the completion threshold is out of reach
            PhaseVerdict::Failed
        }
    }

    /// Resolve and start the next pending phase, skipping empty ones
    ///
    /// Returns false when no pending phase is left.
    async fn start_next_phase(&self, rollout: &mut Rollout) -> Result<bool, ControlError> {
        let phase_count = rollout.phases.len();
        while let Some(index) = rollout
            .phases
            .iter()
            .position(|p| p.status == PhaseStatus::Pending)
        {
            let remaining: Vec<DeviceId> = {
                let placed: HashSet<&DeviceId> = rollout.assigned_devices().collect();
                rollout
                    .population
                    .iter()
                    .filter(|d| !placed.contains(d))
                    .cloned()
                    .collect()
            };
            let devices = resolve_selection(
                self.directory.as_ref(),
                &rollout.tenant_id,
                &rollout.phases[index].plan.selection,
                &remaining,
                index + 1 == phase_count,
            )
            .await?;

            let now = Utc::now();
            let number = rollout.phases[index].number;
            let phase = &mut rollout.phases[index];
            if devices.is_empty() {
                phase.status = next_phase_status(phase.status, PhaseTrigger::Skip)?;
                phase.finished_at = Some(now);
                rollout.touch(now);
                self.emit(rollout, RolloutEventKind::PhaseSkipped { phase: number });
                info!(rollout = %rollout.id, phase = number, "phase resolved to no devices, skipping");
                continue;
            }

            phase.status = next_phase_status(phase.status, PhaseTrigger::Start)?;
            phase.devices = devices.clone();
            phase.started_at = Some(now);
            rollout.touch(now);
            self.emit(
                rollout,
                RolloutEventKind::PhaseStarted {
                    phase: number,
                    devices,
                },
            );
            info!(
                rollout = %rollout.id,
                phase = number,
                devices = rollout.phases[index].devices.len(),
                "phase started"
            );

            self.assign_phase(rollout, index).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn assign_phase(&self, rollout: &Rollout, index: usize) -> Result<(), ControlError> {
        let phase = &rollout.phases[index];
        let target = DeploymentTarget {
            bundle: rollout.bundle.clone(),
            rollout_id: rollout.id.clone(),
            phase_number: phase.number,
        };

        let now = Utc::now();
        for assignment in self.tracker.create_assignments(&rollout.id, phase, now)? {
            if self
                .directory
                .is_member(&rollout.tenant_id, &assignment.device_id)
                .await
            {
                self.desired.recompute(&assignment.device_id, Some(&target))?;
                self.tracker.mark_assigned(&assignment.id, now)?;
            } else {
                warn!(
                    rollout = %rollout.id,
                    device = %assignment.device_id,
                    "device left the fleet, failing its assignment"
                );
                self.tracker
                    .mark_failed(&assignment.id, DEVICE_UNAVAILABLE, None, now)?;
            }
        }
        Ok(())
    }

    fn complete_phase(&self, rollout: &mut Rollout, index: usize) -> Result<(), ControlError> {
        let counts = self.tracker.counts(&rollout.phases[index].id);
        let now = Utc::now();
        let phase = &mut rollout.phases[index];
        phase.status = next_phase_status(phase.status, PhaseTrigger::Complete)?;
        phase.finished_at = Some(now);
        let number = phase.number;
        rollout.touch(now);

        self.emit(
            rollout,
            RolloutEventKind::PhaseCompleted {
                phase: number,
                succeeded: counts.succeeded,
                failed: counts.failed,
            },
        );
        info!(
            rollout = %rollout.id,
            phase = number,
            succeeded = counts.succeeded,
            failed = counts.failed,
            "phase completed"
        );
        Ok(())
    }

    fn complete(
        &self,
        rollout: &mut Rollout,
        follow_ups: &mut Vec<FollowUp>,
    ) -> Result<(), ControlError> {
        self.transition(rollout, RolloutTrigger::Complete)?;
        self.emit(rollout, RolloutEventKind::Completed);
        self.release(rollout)?;
        info!(rollout = %rollout.id, bundle = %rollout.bundle, "rollout completed");

        if let RolloutKind::Rollback { of } = &rollout.kind {
            follow_ups.push(FollowUp::RolledBack {
                original: of.clone(),
                by: rollout.id.clone(),
            });
        }
        Ok(())
    }

    async fn fail(
        &self,
        rollout: &mut Rollout,
        index: usize,
        follow_ups: &mut Vec<FollowUp>,
    ) -> Result<(), ControlError> {
        let now = Utc::now();
        let failed: Vec<RolloutDeviceAssignment> = self
            .tracker
            .phase_assignments(&rollout.phases[index].id)
            .into_iter()
            .filter(|a| a.status == AssignmentStatus::Failed)
            .collect();
        let failing_devices: Vec<DeviceId> = failed.iter().map(|a| a.device_id.clone()).collect();
        let errors: Vec<String> = failed
            .iter()
            .map(|a| {
                format!(
                    "{}: {}",
                    a.device_id,
                    a.last_error.as_deref().unwrap_or("no error reported")
                )
            })
            .collect();

        let phase = &mut rollout.phases[index];
        phase.status = next_phase_status(phase.status, PhaseTrigger::Fail)?;
        phase.finished_at = Some(now);
        let number = phase.number;

        self.emit(
            rollout,
            RolloutEventKind::PhaseFailed {
                phase: number,
                failing_devices: failing_devices.clone(),
            },
        );
        rollout.failure = Some(FailureSummary {
            phase_number: number,
            failing_devices,
            errors,
        });
        self.transition(rollout, RolloutTrigger::Fail)?;
        self.emit(rollout, RolloutEventKind::Failed { phase: number });
        warn!(
            rollout = %rollout.id,
            phase = number,
            failing = failed.len(),
            "rollout failed"
        );

        if rollout.auto_rollback {
            if let Some(rollback_id) = self.prepare_rollback(rollout, index).await? {
                follow_ups.push(FollowUp::BeginRollback(rollback_id));
                return Ok(());
            }
        }
        self.release(rollout)
    }

    /// Create the rollback rollout and hand it the devices to revert
    ///
    /// The new rollout is left Pending; it starts once the caller releases
    /// the original's lock.
    async fn prepare_rollback(
        &self,
        original: &mut Rollout,
        failed_index: usize,
    ) -> Result<Option<RolloutId>, ControlError> {
        let Some(previous) = original.previous_bundle() else {
            warn!(rollout = %original.id, "no previous version to roll back to");
            return Ok(None);
        };

        let candidates: BTreeSet<DeviceId> = match self.options.rollback_scope {
            RollbackScope::Touched => self
                .tracker
                .rollout_assignments(&original.id)
                .into_iter()
                .map(|a| a.device_id)
                .collect(),
            RollbackScope::FailedPhase => original.phases[failed_index]
                .devices
                .iter()
                .cloned()
                .collect(),
        };
        let mut devices = Vec::with_capacity(candidates.len());
        for device_id in candidates {
            if self.directory.is_member(&original.tenant_id, &device_id).await {
                devices.push(device_id);
            }
        }
        if devices.is_empty() {
            warn!(rollout = %original.id, "no devices left to roll back");
            return Ok(None);
        }

        let failed_plan = &original.phases[failed_index].plan;
        let now = Utc::now();
        let rollback = Rollout {
            id: RolloutId::generate(),
            tenant_id: original.tenant_id.clone(),
            bundle: previous,
            previous_version: None,
            status: RolloutStatus::Pending,
            kind: RolloutKind::Rollback {
                of: original.id.clone(),
            },
            auto_rollback: false,
            population: devices.clone(),
            phases: vec![RolloutPhase::new(
                1,
                PhasePlan::new(
                    PhaseSelection::Devices(devices.clone()),
                    failed_plan.completion_threshold,
                    failed_plan.failure_threshold,
                ),
            )],
            revision: 0,
            failure: None,
            rollback_rollout_id: None,
            created_at: now,
            updated_at: now,
        };
        let rollback_id = rollback.id.clone();
        self.insert_handle(rollback_id.clone(), Arc::new(Mutex::new(rollback)));

        {
            let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
            for device_id in &devices {
                claims.insert(device_id.clone(), rollback_id.clone());
            }
        }
        self.release(original)?;

        original.rollback_rollout_id = Some(rollback_id.clone());
        original.touch(now);
        self.emit(
            original,
            RolloutEventKind::RollbackStarted {
                rollback_rollout_id: rollback_id.clone(),
                devices: devices.len(),
            },
        );
        info!(
            rollout = %original.id,
            rollback = %rollback_id,
            devices = devices.len(),
            "rollback rollout created"
        );
        Ok(Some(rollback_id))
    }

    async fn apply_follow_ups(&self, mut queue: Vec<FollowUp>) -> Result<(), ControlError> {
        while let Some(follow_up) = queue.pop() {
            match follow_up {
                FollowUp::BeginRollback(id) => {
                    let handle = self.handle(&id)?;
                    let mut rollback = handle.lock().await;
                    if rollback.status == RolloutStatus::Pending {
                        queue.extend(self.begin(&mut rollback).await?);
                    }
                }
                FollowUp::RolledBack { original, by } => {
                    let handle = self.handle(&original)?;
                    let mut rollout = handle.lock().await;
                    self.transition(&mut rollout, RolloutTrigger::RollbackCompleted)?;
                    self.emit(&rollout, RolloutEventKind::RolledBack { by: by.clone() });
                    info!(rollout = %original, rollback = %by, "rollout rolled back");
                }
            }
        }
        Ok(())
    }

    fn cancel_locked(
        &self,
        rollout: &mut Rollout,
        superseded_by: Option<&RolloutId>,
    ) -> Result<(), ControlError> {
        self.transition(rollout, RolloutTrigger::Cancel)?;
        let kind = match superseded_by {
            Some(by) => RolloutEventKind::Superseded { by: by.clone() },
            None => RolloutEventKind::Cancelled,
        };
        self.emit(rollout, kind);
        self.release(rollout)?;
        info!(rollout = %rollout.id, superseded_by = ?superseded_by, "rollout cancelled");
        Ok(())
    }

    // =============================== CLAIMS ================================ //

    async fn resolve_population(
        &self,
        tenant_id: &TenantId,
        selector: &DeviceSelector,
    ) -> Result<Vec<DeviceId>, ControlError> {
        let mut devices = match selector {
            DeviceSelector::Devices(ids) => {
                let mut members = Vec::with_capacity(ids.len());
                for device_id in ids {
                    if self.directory.is_member(tenant_id, device_id).await {
                        members.push(device_id.clone());
                    } else {
                        warn!(tenant = %tenant_id, device = %device_id, "ignoring device outside the tenant fleet");
                    }
                }
                members
            }
            DeviceSelector::Tags(query) => self.directory.resolve_cohort(tenant_id, query).await?,
            DeviceSelector::All => self.directory.devices(tenant_id).await,
        };
        devices.sort();
        devices.dedup();

        if devices.is_empty() {
            return Err(ControlError::Validation(
                "device selector resolved to no devices".to_string(),
            ));
        }
        Ok(devices)
    }

    fn busy_devices(&self, population: &[DeviceId]) -> BTreeMap<RolloutId, Vec<DeviceId>> {
        let claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        let mut busy: BTreeMap<RolloutId, Vec<DeviceId>> = BTreeMap::new();
        for device_id in population {
            if let Some(owner) = claims.get(device_id) {
                busy.entry(owner.clone()).or_default().push(device_id.clone());
            }
        }
        busy
    }

    async fn claim_population(&self, rollout: &Rollout) -> Result<(), ControlError> {
        let busy = self.busy_devices(&rollout.population);
        if !busy.is_empty() {
            match self.options.conflict_policy {
                ConflictPolicy::Reject => return Err(conflict_error(&busy)),
                ConflictPolicy::Supersede => {
                    for owner in busy.keys() {
                        self.supersede(owner, &rollout.id).await?;
                    }
                }
            }
        }

        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        let mut still_busy: BTreeMap<RolloutId, Vec<DeviceId>> = BTreeMap::new();
        for device_id in &rollout.population {
            if let Some(owner) = claims.get(device_id) {
                still_busy
                    .entry(owner.clone())
                    .or_default()
                    .push(device_id.clone());
            }
        }
        if !still_busy.is_empty() {
            return Err(conflict_error(&still_busy));
        }
        for device_id in &rollout.population {
            claims.insert(device_id.clone(), rollout.id.clone());
        }
        Ok(())
    }

    async fn supersede(&self, id: &RolloutId, by: &RolloutId) -> Result<(), ControlError> {
        let handle = self.handle(id)?;
        let mut rollout = handle.lock().await;
        if rollout.status.is_active() || rollout.status == RolloutStatus::Pending {
            self.cancel_locked(&mut rollout, Some(by))
        } else {
            self.release(&rollout)
        }
    }

    /// Drop the rollout's device claims; devices it still had in flight fall
    /// back to their last known good state
    fn release(&self, rollout: &Rollout) -> Result<(), ControlError> {
        let released: HashSet<DeviceId> = {
            let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
            let mut released = HashSet::new();
            claims.retain(|device_id, owner| {
                if owner == &rollout.id {
                    released.insert(device_id.clone());
                    false
                } else {
                    true
                }
            });
            released
        };

        for assignment in self.tracker.rollout_assignments(&rollout.id) {
            if !assignment.status.is_terminal() && released.contains(&assignment.device_id) {
                self.desired.recompute(&assignment.device_id, None)?;
            }
        }
        Ok(())
    }

    // =============================== HELPERS =============================== //

    fn transition(&self, rollout: &mut Rollout, trigger: RolloutTrigger) -> Result<(), ControlError> {
        let to = next_status(rollout.status, trigger)?;
        debug!(rollout = %rollout.id, from = %rollout.status, to = %to, "rollout transition");
        rollout.status = to;
        rollout.touch(Utc::now());
        Ok(())
    }

    fn emit(&self, rollout: &Rollout, kind: RolloutEventKind) {
        self.events.append(&rollout.id, &rollout.tenant_id, kind);
    }

    fn snapshot(&self, rollout: &Rollout) -> RolloutSnapshot {
        let window = chrono::Duration::seconds(self.options.stale_after.as_secs() as i64);
        RolloutSnapshot {
            rollout: rollout.clone(),
            phase_counts: rollout
                .phases
                .iter()
                .map(|p| self.tracker.counts(&p.id))
                .collect(),
            stale_assignments: self.tracker.stale_count(&rollout.id, Utc::now(), window),
        }
    }

    fn handle(&self, id: &RolloutId) -> Result<Arc<Mutex<Rollout>>, ControlError> {
        let rollouts = self.rollouts.read().unwrap_or_else(|e| e.into_inner());
        rollouts
            .get(id)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(format!("rollout {}", id)))
    }

    fn handles(&self) -> Vec<Arc<Mutex<Rollout>>> {
        let rollouts = self.rollouts.read().unwrap_or_else(|e| e.into_inner());
        rollouts.values().cloned().collect()
    }

    fn insert_handle(&self, id: RolloutId, handle: Arc<Mutex<Rollout>>) {
        let mut rollouts = self.rollouts.write().unwrap_or_else(|e| e.into_inner());
        rollouts.insert(id, handle);
    }

    fn remove_handle(&self, id: &RolloutId) {
        let mut rollouts = self.rollouts.write().unwrap_or_else(|e| e.into_inner());
        rollouts.remove(id);
    }
}

fn conflict_error(busy: &BTreeMap<RolloutId, Vec<DeviceId>>) -> ControlError {
    let devices: Vec<&DeviceId> = busy.values().flatten().collect();
    ControlError::Conflict {
        message: format!(
            "{} device(s) already belong to an active rollout",
            devices.len()
        ),
        details: Some(serde_json::json!({
            "devices": devices,
            "rollouts": busy.keys().collect::<Vec<_>>(),
        })),
    }
}
