//! Device assignment tracker
//!
//! Materializes a phase's device selection into concrete assignments and
//! guards every per-device status change.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::errors::ControlError;
use crate::fleet::directory::DeviceDirectory;
use crate::ids::{AssignmentId, DeviceId, PhaseId, RolloutId, TenantId};
use crate::models::assignment::{AssignmentStatus, RolloutDeviceAssignment};
use crate::models::rollout::{PhaseSelection, RolloutPhase};

/// Assignment counts of a phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub pending: usize,
    pub assigned: usize,
    pub reconciling: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.pending + self.assigned + self.reconciling + self.succeeded + self.failed
    }

    /// Devices still waiting on an outcome
    pub fn in_flight(&self) -> usize {
        self.pending + self.assigned + self.reconciling
    }

    pub fn success_fraction(&self) -> f64 {
        fraction(self.succeeded, self.total())
    }

    pub fn failure_fraction(&self) -> f64 {
        fraction(self.failed, self.total())
    }

    fn add(&mut self, status: AssignmentStatus) {
        match status {
            AssignmentStatus::Pending => self.pending += 1,
            AssignmentStatus::Assigned => self.assigned += 1,
            AssignmentStatus::Reconciling => self.reconciling += 1,
            AssignmentStatus::Succeeded => self.succeeded += 1,
            AssignmentStatus::Failed => self.failed += 1,
        }
    }
}

fn fraction(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Devices a percentage of `population` covers, rounded up
///
/// Computed in basis points so that e.g. 7% of 100 is exactly 7.
pub fn percentage_count(percent: f64, population: usize) -> usize {
    let basis_points = (percent * 100.0).round().clamp(0.0, 10_000.0) as u64;
    let count = (basis_points * population as u64).div_ceil(10_000);
    count as usize
}

/// Resolve a phase selection against the devices not yet placed in a phase
///
/// `remaining` must be sorted; the result keeps that order. A percentage
/// selection on the final phase sweeps everything that is left.
pub async fn resolve_selection(
    directory: &dyn DeviceDirectory,
    tenant_id: &TenantId,
    selection: &PhaseSelection,
    remaining: &[DeviceId],
    is_final_phase: bool,
) -> Result<Vec<DeviceId>, ControlError> {
    let resolved = match selection {
        PhaseSelection::Devices(ids) => {
            let wanted: HashSet<&DeviceId> = ids.iter().collect();
            let picked: Vec<DeviceId> = remaining
                .iter()
                .filter(|d| wanted.contains(d))
                .cloned()
                .collect();
            if picked.len() < wanted.len() {
                warn!(
                    tenant = %tenant_id,
                    requested = wanted.len(),
                    picked = picked.len(),
                    "explicit phase selection names devices outside the remaining population"
                );
            }
            picked
        }
        PhaseSelection::Percentage(_) if is_final_phase => remaining.to_vec(),
        PhaseSelection::Percentage(percent) => {
            let count = percentage_count(*percent, remaining.len());
            remaining.iter().take(count).cloned().collect()
        }
        PhaseSelection::Tags(query) => {
            let cohort: HashSet<DeviceId> = directory
                .resolve_cohort(tenant_id, query)
                .await?
                .into_iter()
                .collect();
            remaining
                .iter()
                .filter(|d| cohort.contains(d))
                .cloned()
                .collect()
        }
    };
    Ok(resolved)
}

#[derive(Default)]
struct TrackerInner {
    assignments: HashMap<AssignmentId, RolloutDeviceAssignment>,
    by_rollout_device: HashMap<(RolloutId, DeviceId), AssignmentId>,
    by_phase: HashMap<PhaseId, Vec<AssignmentId>>,
    by_rollout: HashMap<RolloutId, Vec<AssignmentId>>,
}

/// In-memory assignment tracker
#[derive(Default)]
pub struct DeviceAssignmentTracker {
    inner: RwLock<TrackerInner>,
}

impl DeviceAssignmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create one Pending assignment per device of a resolved phase
    pub fn create_assignments(
        &self,
        rollout_id: &RolloutId,
        phase: &RolloutPhase,
        now: DateTime<Utc>,
    ) -> Result<Vec<RolloutDeviceAssignment>, ControlError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = phase
            .devices
            .iter()
            .find(|d| inner.by_rollout_device.contains_key(&(rollout_id.clone(), (*d).clone())))
        {
            return Err(ControlError::conflict(format!(
                "device {} already has an assignment in rollout {}",
                existing, rollout_id
            )));
        }

        let mut created = Vec::with_capacity(phase.devices.len());
        for device_id in &phase.devices {
            let assignment = RolloutDeviceAssignment::new(
                rollout_id.clone(),
                phase.id.clone(),
                phase.number,
                device_id.clone(),
                now,
            );
            let id = assignment.id.clone();
            inner
                .by_rollout_device
                .insert((rollout_id.clone(), device_id.clone()), id.clone());
            inner
                .by_phase
                .entry(phase.id.clone())
                .or_default()
                .push(id.clone());
            inner
                .by_rollout
                .entry(rollout_id.clone())
                .or_default()
                .push(id.clone());
            inner.assignments.insert(id, assignment.clone());
            created.push(assignment);
        }

        debug!(
            rollout = %rollout_id,
            phase = phase.number,
            devices = created.len(),
            "created assignments"
        );
        Ok(created)
    }

    pub fn mark_assigned(
        &self,
        id: &AssignmentId,
        now: DateTime<Utc>,
    ) -> Result<RolloutDeviceAssignment, ControlError> {
        self.update(id, |a| a.transition(AssignmentStatus::Assigned, now))
    }

    pub fn mark_reconciling(
        &self,
        id: &AssignmentId,
        now: DateTime<Utc>,
    ) -> Result<RolloutDeviceAssignment, ControlError> {
        self.update(id, |a| a.transition(AssignmentStatus::Reconciling, now))
    }

    pub fn mark_succeeded(
        &self,
        id: &AssignmentId,
        detail: Option<String>,
        cycle_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RolloutDeviceAssignment, ControlError> {
        self.update(id, |a| {
            a.transition(AssignmentStatus::Succeeded, now)?;
            a.detail = detail;
            a.last_cycle_id = cycle_id;
            Ok(())
        })
    }

    pub fn mark_failed(
        &self,
        id: &AssignmentId,
        reason: impl Into<String>,
        cycle_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RolloutDeviceAssignment, ControlError> {
        let reason = reason.into();
        self.update(id, |a| {
            a.transition(AssignmentStatus::Failed, now)?;
            a.last_error = Some(reason);
            a.last_cycle_id = cycle_id;
            Ok(())
        })
    }

    fn update<F>(&self, id: &AssignmentId, apply: F) -> Result<RolloutDeviceAssignment, ControlError>
    where
        F: FnOnce(&mut RolloutDeviceAssignment) -> Result<(), ControlError>,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let assignment = inner
            .assignments
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("assignment {}", id)))?;
        apply(assignment)?;
        Ok(assignment.clone())
    }

    pub fn get(&self, id: &AssignmentId) -> Option<RolloutDeviceAssignment> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.assignments.get(id).cloned()
    }

    /// The assignment of a device within a rollout
    pub fn find(
        &self,
        rollout_id: &RolloutId,
        device_id: &DeviceId,
    ) -> Option<RolloutDeviceAssignment> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .by_rollout_device
            .get(&(rollout_id.clone(), device_id.clone()))
            .and_then(|id| inner.assignments.get(id))
            .cloned()
    }

    pub fn phase_assignments(&self, phase_id: &PhaseId) -> Vec<RolloutDeviceAssignment> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .by_phase
            .get(phase_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.assignments.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rollout_assignments(&self, rollout_id: &RolloutId) -> Vec<RolloutDeviceAssignment> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .by_rollout
            .get(rollout_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.assignments.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn counts(&self, phase_id: &PhaseId) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for assignment in self.phase_assignments(phase_id) {
            counts.add(assignment.status);
        }
        counts
    }

    /// Assignments of a rollout stuck in flight for longer than `window`
    pub fn stale_count(
        &self,
        rollout_id: &RolloutId,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> usize {
        self.rollout_assignments(rollout_id)
            .iter()
            .filter(|a| a.is_stale(now, window))
            .count()
    }
}
