//! Health and version handlers

use axum::{response::IntoResponse, Json};
use serde::Serialize;

use crate::utils::{version_info, VersionInfo};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fleet-control".to_string(),
        version: version_info().version,
    })
}

pub async fn version_handler() -> Json<VersionInfo> {
    Json(version_info())
}
