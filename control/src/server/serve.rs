//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ControlError;
use crate::server::handlers::{channel, operator, system};
use crate::server::state::ServerState;

/// All routes of the control plane
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(system::health_handler))
        .route("/version", get(system::version_handler))
        // Device channel
        .route(
            "/agent/devices/{device_id}/desired-state",
            get(channel::desired_state_handler),
        )
        .route(
            "/agent/devices/{device_id}/current-state",
            post(channel::current_state_handler),
        )
        .route(
            "/agent/devices/{device_id}/reconciliation-outcome",
            post(channel::outcome_handler),
        )
        .route(
            "/agent/tenants/{tenant_id}/bundles/{bundle_id}/versions/{version}",
            get(channel::bundle_artifact_handler),
        )
        // Bundles
        .route(
            "/tenants/{tenant_id}/bundles/{bundle_id}/versions",
            post(operator::register_bundle_handler),
        )
        .route(
            "/tenants/{tenant_id}/bundles/{bundle_id}/latest",
            get(operator::latest_bundle_handler),
        )
        // Rollouts
        .route(
            "/tenants/{tenant_id}/rollouts",
            post(operator::start_rollout_handler).get(operator::list_rollouts_handler),
        )
        .route("/rollouts/{rollout_id}", get(operator::rollout_handler))
        .route(
            "/rollouts/{rollout_id}/devices",
            get(operator::rollout_devices_handler),
        )
        .route(
            "/rollouts/{rollout_id}/events",
            get(operator::rollout_events_handler),
        )
        .route("/rollouts/{rollout_id}/pause", post(operator::pause_handler))
        .route("/rollouts/{rollout_id}/resume", post(operator::resume_handler))
        .route("/rollouts/{rollout_id}/cancel", post(operator::cancel_handler))
        .route("/rollouts/{rollout_id}/advance", post(operator::advance_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ControlError>>, ControlError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ControlError::Server(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ControlError::Server(e.to_string()))
    });

    Ok(handle)
}
