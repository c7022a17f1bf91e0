//! Operator API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use openapi_server::models::{
    BundleVersionResponse, DeviceStatusListResponse, RegisterBundleVersionRequest,
    RolloutListResponse, RolloutStatusResponse, StartRolloutRequest,
};

use crate::errors::ControlError;
use crate::events::log::RolloutEvent;
use crate::ids::{BundleId, RolloutId, TenantId};
use crate::server::convert::{bundle_response, device_status, rollout_response, start_request};
use crate::server::state::ServerState;

pub async fn register_bundle_handler(
    State(state): State<Arc<ServerState>>,
    Path((tenant_id, bundle_id)): Path<(String, String)>,
    Json(request): Json<RegisterBundleVersionRequest>,
) -> Result<(StatusCode, Json<BundleVersionResponse>), ControlError> {
    let bundle = state.registry.register(
        &TenantId::from(tenant_id),
        &BundleId::from(bundle_id),
        &request.version,
        request.containers,
    )?;
    Ok((StatusCode::CREATED, Json(bundle_response(&bundle))))
}

pub async fn latest_bundle_handler(
    State(state): State<Arc<ServerState>>,
    Path((tenant_id, bundle_id)): Path<(String, String)>,
) -> Result<Json<BundleVersionResponse>, ControlError> {
    let bundle = state
        .registry
        .latest(&TenantId::from(tenant_id), &BundleId::from(bundle_id))?;
    Ok(Json(bundle_response(&bundle)))
}

pub async fn start_rollout_handler(
    State(state): State<Arc<ServerState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<StartRolloutRequest>,
) -> Result<(StatusCode, Json<RolloutStatusResponse>), ControlError> {
    let request = start_request(TenantId::from(tenant_id), request);
    let snapshot = state.orchestrator.start_rollout(request).await?;
    Ok((StatusCode::CREATED, Json(rollout_response(&snapshot))))
}

pub async fn list_rollouts_handler(
    State(state): State<Arc<ServerState>>,
    Path(tenant_id): Path<String>,
) -> Json<RolloutListResponse> {
    let rollouts: Vec<RolloutStatusResponse> = state
        .orchestrator
        .list_rollouts(&TenantId::from(tenant_id))
        .await
        .iter()
        .map(rollout_response)
        .collect();
    let total = rollouts.len();
    Json(RolloutListResponse { rollouts, total })
}

pub async fn rollout_handler(
    State(state): State<Arc<ServerState>>,
    Path(rollout_id): Path<String>,
) -> Result<Json<RolloutStatusResponse>, ControlError> {
    let snapshot = state
        .orchestrator
        .rollout_status(&RolloutId::from(rollout_id))
        .await?;
    Ok(Json(rollout_response(&snapshot)))
}

pub async fn rollout_devices_handler(
    State(state): State<Arc<ServerState>>,
    Path(rollout_id): Path<String>,
) -> Result<Json<DeviceStatusListResponse>, ControlError> {
    let rollout_id = RolloutId::from(rollout_id);
    let devices = state
        .orchestrator
        .device_statuses(&rollout_id)
        .await?
        .iter()
        .map(|assignment| {
            let reported = state
                .reports
                .current_state(&assignment.device_id)
                .and_then(|r| r.report.bundle_version);
            device_status(assignment, reported)
        })
        .collect();

    Ok(Json(DeviceStatusListResponse {
        rollout_id: rollout_id.to_string(),
        devices,
    }))
}

pub async fn rollout_events_handler(
    State(state): State<Arc<ServerState>>,
    Path(rollout_id): Path<String>,
) -> Result<Json<Vec<RolloutEvent>>, ControlError> {
    let rollout_id = RolloutId::from(rollout_id);
    state.orchestrator.rollout_status(&rollout_id).await?;
    Ok(Json(state.events.for_rollout(&rollout_id)))
}

pub async fn pause_handler(
    State(state): State<Arc<ServerState>>,
    Path(rollout_id): Path<String>,
) -> Result<Json<RolloutStatusResponse>, ControlError> {
    let snapshot = state
        .orchestrator
        .pause_rollout(&RolloutId::from(rollout_id))
        .await?;
    Ok(Json(rollout_response(&snapshot)))
}

pub async fn resume_handler(
    State(state): State<Arc<ServerState>>,
    Path(rollout_id): Path<String>,
) -> Result<Json<RolloutStatusResponse>, ControlError> {
    let snapshot = state
        .orchestrator
        .resume_rollout(&RolloutId::from(rollout_id))
        .await?;
    Ok(Json(rollout_response(&snapshot)))
}

pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(rollout_id): Path<String>,
) -> Result<Json<RolloutStatusResponse>, ControlError> {
    let snapshot = state
        .orchestrator
        .cancel_rollout(&RolloutId::from(rollout_id))
        .await?;
    Ok(Json(rollout_response(&snapshot)))
}

pub async fn advance_handler(
    State(state): State<Arc<ServerState>>,
    Path(rollout_id): Path<String>,
) -> Result<Json<RolloutStatusResponse>, ControlError> {
    let snapshot = state
        .orchestrator
        .advance_phase_if_ready(&RolloutId::from(rollout_id))
        .await?;
    Ok(Json(rollout_response(&snapshot)))
}
