//! HTTP request handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::reconcile::cycle::ReconcilerStatus;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fleet-agent".to_string(),
        version: version.version,
    })
}

pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Device info response
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub id: String,
    pub tenant_id: Option<String>,
    pub name: Option<String>,
}

pub async fn device_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(DeviceResponse {
        id: state.device.id.clone(),
        tenant_id: state.device.tenant_id.clone(),
        name: state.device.name.clone(),
    })
}

/// Reconcile trigger response
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub triggered: bool,
    pub message: String,
}

/// Ask the worker for a cycle; it runs after the current one, if any
pub async fn reconcile_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.trigger.notify_one();
    (
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            triggered: true,
            message: "Reconciliation scheduled".to_string(),
        }),
    )
}

/// Reconciliation status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub device_id: String,
    pub reconciler: ReconcilerStatus,
    pub cached_generation: Option<u64>,
    pub outbox_pending: usize,
}

pub async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let reconciler = &state.reconciler;
    Json(StatusResponse {
        device_id: state.device.id.clone(),
        reconciler: reconciler.status(),
        cached_generation: reconciler.cache().generation(),
        outbox_pending: reconciler.outbox().len().await,
    })
}
