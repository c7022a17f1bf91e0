//! Device channel handlers
//!
//! Every request carries `Authorization: Bearer <token>` and the device id
//! header. Token verification belongs to the identity service; here the
//! header has to be present and the device has to be known to the fleet.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use openapi_client::models::{
    CurrentStateReport, ReconciliationOutcomeReport, ReportAck, DEVICE_ID_HEADER,
};

use crate::errors::ControlError;
use crate::ids::{BundleId, DeviceId, RolloutId, TenantId};
use crate::models::bundle::BundleKey;
use crate::registry::bundles::{BundleVersionRegistry, ConditionalFetch};
use crate::rollout::orchestrator::DeviceOutcome;
use crate::server::state::ServerState;

fn header_device_id(headers: &HeaderMap) -> Result<DeviceId, ControlError> {
    headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(DeviceId::from)
        .ok_or_else(|| ControlError::Unauthorized(format!("missing {} header", DEVICE_ID_HEADER)))
}

/// Check the caller is the device it claims to be; returns its tenant
async fn authorize_device(
    state: &ServerState,
    headers: &HeaderMap,
    device_id: &DeviceId,
) -> Result<TenantId, ControlError> {
    let has_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty());
    if !has_token {
        return Err(ControlError::Unauthorized("missing bearer token".to_string()));
    }

    if &header_device_id(headers)? != device_id {
        return Err(ControlError::Unauthorized(format!(
            "device header does not match {}",
            device_id
        )));
    }

    state
        .directory
        .tenant_of(device_id)
        .await
        .ok_or_else(|| ControlError::Unauthorized(format!("unknown device {}", device_id)))
}

/// Entity tag from `If-None-Match`, without quotes or weak prefix
fn if_none_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_start_matches("W/").trim_matches('"').to_string())
}

fn etag_value(tag: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("\"{}\"", tag)).ok()
}

fn with_etag(body: impl IntoResponse, tag: &str) -> Response {
    let mut response = body.into_response();
    if let Some(value) = etag_value(tag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

fn not_modified(tag: &str) -> Response {
    with_etag(StatusCode::NOT_MODIFIED, tag)
}

/// Serve the device's desired state; the generation is the entity tag
pub async fn desired_state_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ControlError> {
    let device_id = DeviceId::from(device_id);
    authorize_device(&state, &headers, &device_id).await?;

    let document = state.desired.desired_state(&device_id);
    if let Some(assignment) = &document.assignment {
        state
            .orchestrator
            .note_desired_state_delivered(&device_id, &RolloutId::new(assignment.rollout_id.clone()))
            .await?;
    }

    let tag = document.generation.to_string();
    if if_none_match(&headers).as_deref() == Some(tag.as_str()) {
        return Ok(not_modified(&tag));
    }
    Ok(with_etag(Json(document), &tag))
}

pub async fn current_state_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(report): Json<CurrentStateReport>,
) -> Result<Json<ReportAck>, ControlError> {
    let device_id = DeviceId::from(device_id);
    authorize_device(&state, &headers, &device_id).await?;

    state.reports.record_current_state(&device_id, report);
    Ok(Json(ReportAck {
        accepted: true,
        duplicate: false,
    }))
}

/// Record a reconciliation outcome and feed it to the owning rollout
pub async fn outcome_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(report): Json<ReconciliationOutcomeReport>,
) -> Result<Json<ReportAck>, ControlError> {
    let device_id = DeviceId::from(device_id);
    authorize_device(&state, &headers, &device_id).await?;

    state.reports.record_outcome(&device_id, report.clone());
    let Some(rollout_id) = report.rollout_id else {
        return Ok(Json(ReportAck {
            accepted: true,
            duplicate: false,
        }));
    };

    let outcome = DeviceOutcome {
        status: report.status,
        cycle_id: report.cycle_id,
        phase_number: report.phase_number,
        errors: report.errors,
        detail: report.bundle_version.map(|v| format!("running {}", v)),
    };
    let ack = state
        .orchestrator
        .record_device_outcome(&RolloutId::new(rollout_id), &device_id, outcome)
        .await?;

    Ok(Json(ReportAck {
        accepted: true,
        duplicate: ack.duplicate,
    }))
}

/// Serve a bundle definition to a device of the same tenant
pub async fn bundle_artifact_handler(
    State(state): State<Arc<ServerState>>,
    Path((tenant_id, bundle_id, version)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ControlError> {
    let device_id = header_device_id(&headers)?;
    let tenant = authorize_device(&state, &headers, &device_id).await?;
    if tenant.as_str() != tenant_id {
        return Err(ControlError::Unauthorized(format!(
            "device {} does not belong to tenant {}",
            device_id, tenant_id
        )));
    }

    let key = BundleKey {
        tenant_id: tenant,
        bundle_id: BundleId::from(bundle_id),
        version: BundleVersionRegistry::parse_version(&version)?,
    };
    let known = if_none_match(&headers);
    match state.registry.get_if_changed(&key, known.as_deref())? {
        ConditionalFetch::NotModified => Ok(not_modified(known.as_deref().unwrap_or_default())),
        ConditionalFetch::Modified(bundle) => Ok(with_etag(Json(bundle.definition()), &bundle.checksum)),
    }
}
