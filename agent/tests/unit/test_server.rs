//! Local API tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use fleet_agent::server::serve::router;
use fleet_agent::server::state::ServerState;
use serde_json::Value;
use tower::ServiceExt;

use crate::harness::{document, sensor_a, Agent, DEVICE, TENANT};

fn app(agent: &Agent) -> Router {
    let state = &agent.state;
    router(Arc::new(ServerState::new(
        state.device.clone(),
        state.reconciler.clone(),
        state.trigger.clone(),
    )))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_and_device() {
    let agent = Agent::new().await;

    let response = app(&agent).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["service"], "fleet-agent");

    let response = app(&agent).oneshot(get("/device")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["id"], DEVICE);
    assert_eq!(body["tenant_id"], TENANT);
}

#[tokio::test]
async fn test_reconcile_wakes_worker() {
    let agent = Agent::new().await;

    let request = Request::builder()
        .method("POST")
        .uri("/reconcile")
        .body(Body::empty())
        .unwrap();
    let response = app(&agent).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["triggered"], true);

    tokio::time::timeout(Duration::from_secs(1), agent.state.trigger.notified())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_status_reflects_last_cycle() {
    let agent = Agent::new().await;
    agent.channel.set_desired(document(1, "1.0.0", vec![sensor_a()]));
    agent.cycle().await;

    let response = app(&agent).oneshot(get("/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["device_id"], DEVICE);
    assert_eq!(body["cached_generation"], 1);
    assert_eq!(body["outbox_pending"], 0);
    assert_eq!(body["reconciler"]["cycles"], 1);
    assert_eq!(body["reconciler"]["running"], false);
    assert_eq!(body["reconciler"]["last_cycle"]["status"], "succeeded");
    assert_eq!(body["reconciler"]["last_cycle"]["source"], "fetched");
}
