//! Conversions between API models and domain types

use openapi_server::models::{
    BundleVersionResponse, DeviceSelectorDto, DeviceStatusDto, FailureSummaryDto,
    OutcomeCountsDto, PhasePlanDto, PhaseSelectionDto, PhaseStatusDto, RolloutStatusResponse,
    StartRolloutRequest,
};

use crate::ids::{BundleId, DeviceId, TenantId};
use crate::models::assignment::RolloutDeviceAssignment;
use crate::models::bundle::BundleVersion;
use crate::models::rollout::{DeviceSelector, PhasePlan, PhaseSelection};
use crate::rollout::orchestrator::{RolloutSnapshot, StartRollout};
use crate::tracker::assignments::OutcomeCounts;

fn device_ids(ids: Vec<String>) -> Vec<DeviceId> {
    ids.into_iter().map(DeviceId::from).collect()
}

impl From<DeviceSelectorDto> for DeviceSelector {
    fn from(dto: DeviceSelectorDto) -> Self {
        match dto {
            DeviceSelectorDto::Devices { ids } => DeviceSelector::Devices(device_ids(ids)),
            DeviceSelectorDto::Tags { query } => DeviceSelector::Tags(query),
            DeviceSelectorDto::All => DeviceSelector::All,
        }
    }
}

impl From<PhasePlanDto> for PhasePlan {
    fn from(dto: PhasePlanDto) -> Self {
        let selection = match dto.selection {
            PhaseSelectionDto::Devices { ids } => PhaseSelection::Devices(device_ids(ids)),
            PhaseSelectionDto::Percentage { percent } => PhaseSelection::Percentage(percent),
            PhaseSelectionDto::Tags { query } => PhaseSelection::Tags(query),
        };
        PhasePlan::new(selection, dto.completion_threshold, dto.failure_threshold)
    }
}

pub fn start_request(tenant_id: TenantId, request: StartRolloutRequest) -> StartRollout {
    StartRollout {
        tenant_id,
        bundle_id: BundleId::from(request.bundle_id),
        version: request.version,
        previous_version: request.previous_version,
        device_selector: request.device_selector.into(),
        phases: request.phases.into_iter().map(PhasePlan::from).collect(),
        auto_rollback: request.auto_rollback,
    }
}

pub fn bundle_response(bundle: &BundleVersion) -> BundleVersionResponse {
    BundleVersionResponse {
        tenant_id: bundle.tenant_id.to_string(),
        bundle_id: bundle.bundle_id.to_string(),
        version: bundle.version.to_string(),
        checksum: bundle.checksum.clone(),
        containers: bundle.containers.clone(),
        created_at: bundle.created_at,
    }
}

fn counts_dto(counts: &OutcomeCounts) -> OutcomeCountsDto {
    OutcomeCountsDto {
        pending: counts.pending,
        assigned: counts.assigned,
        reconciling: counts.reconciling,
        succeeded: counts.succeeded,
        failed: counts.failed,
    }
}

pub fn rollout_response(snapshot: &RolloutSnapshot) -> RolloutStatusResponse {
    let rollout = &snapshot.rollout;
    RolloutStatusResponse {
        id: rollout.id.to_string(),
        tenant_id: rollout.tenant_id.to_string(),
        bundle_id: rollout.bundle.bundle_id.to_string(),
        version: rollout.bundle.version.to_string(),
        previous_version: rollout.previous_version.as_ref().map(|v| v.to_string()),
        status: rollout.status.to_string(),
        kind: rollout.kind.as_str().to_string(),
        auto_rollback: rollout.auto_rollback,
        revision: rollout.revision,
        population: rollout.population.len(),
        phases: rollout
            .phases
            .iter()
            .zip(snapshot.phase_counts.iter())
            .map(|(phase, counts)| PhaseStatusDto {
                number: phase.number,
                status: phase.status.to_string(),
                devices: phase.devices.len(),
                counts: counts_dto(counts),
                completion_threshold: phase.plan.completion_threshold,
                failure_threshold: phase.plan.failure_threshold,
                started_at: phase.started_at,
                finished_at: phase.finished_at,
            })
            .collect(),
        stale_assignments: snapshot.stale_assignments,
        failure: rollout.failure.as_ref().map(|f| FailureSummaryDto {
            phase_number: f.phase_number,
            failing_devices: f.failing_devices.iter().map(|d| d.to_string()).collect(),
            errors: f.errors.clone(),
        }),
        rollback_rollout_id: rollout.rollback_rollout_id.as_ref().map(|id| id.to_string()),
        created_at: rollout.created_at,
        updated_at: rollout.updated_at,
    }
}

pub fn device_status(
    assignment: &RolloutDeviceAssignment,
    reported_bundle_version: Option<String>,
) -> DeviceStatusDto {
    DeviceStatusDto {
        device_id: assignment.device_id.to_string(),
        phase_number: assignment.phase_number,
        status: assignment.status.to_string(),
        error: assignment.last_error.clone(),
        updated_at: assignment.last_transition_at(),
        reported_bundle_version,
    }
}
