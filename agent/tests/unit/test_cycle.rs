//! Reconciliation cycle tests

use std::sync::Arc;

use fleet_agent::errors::AgentError;
use fleet_agent::reconcile::cycle::{CycleResult, DesiredStateSource};
use openapi_client::models::{ActionKind, ActionReport, ActionStatus, OutcomeStatus};
use tokio::sync::Semaphore;

use crate::harness::{
    definition, document, gateway, sensor_a, sensor_b, Agent, FakeRuntime,
};

fn action<'a>(actions: &'a [ActionReport], kind: ActionKind, container: &str) -> &'a ActionReport {
    actions
        .iter()
        .find(|a| a.action == kind && a.container == container)
        .unwrap_or_else(|| panic!("no {:?} action for {}", kind, container))
}

#[tokio::test]
async fn test_upgrade_stops_before_starting() {
    let agent = Agent::new().await;
    agent.runtime.seed(&sensor_a());
    agent
        .channel
        .set_desired(document(2, "2.0.0", vec![sensor_b(), gateway()]));

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Succeeded);
    assert_eq!(summary.source, DesiredStateSource::Fetched);
    assert_eq!(summary.actions.len(), 3);
    assert_eq!(agent.runtime.names(), vec!["gateway", "sensor-b"]);

    let calls = agent.runtime.calls();
    let stop = calls.iter().position(|c| c == "stop sensor-a").unwrap();
    let first_start = calls.iter().position(|c| c.starts_with("start")).unwrap();
    let first_pull = calls.iter().position(|c| c.starts_with("pull")).unwrap();
    assert!(stop < first_start);
    assert!(stop < first_pull);

    let outcomes = agent.channel.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].cycle_id, summary.cycle_id);
    assert_eq!(outcomes[0].attempt, 1);
    assert_eq!(outcomes[0].rollout_id.as_deref(), Some("r-1"));
    assert_eq!(outcomes[0].phase_number, Some(1));
    assert_eq!(outcomes[0].bundle_version.as_deref(), Some("2.0.0"));

    let current = agent.channel.last_current_state().unwrap();
    assert_eq!(current.bundle_version.as_deref(), Some("2.0.0"));
    assert_eq!(current.running_containers.len(), 2);
}

#[tokio::test]
async fn test_upgrade_leaves_unchanged_container_alone() {
    let agent = Agent::new().await;
    agent.runtime.seed(&sensor_a());
    agent.runtime.seed(&gateway());
    agent
        .channel
        .set_desired(document(2, "2.0.0", vec![sensor_b(), gateway()]));

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Succeeded);
    assert_eq!(summary.actions.len(), 2);
    assert!(summary.actions.iter().all(|a| a.container != "gateway"));

    let calls = agent.runtime.calls();
    assert_eq!(
        calls,
        vec![
            "stop sensor-a".to_string(),
            format!("pull {}", sensor_b().image),
            "start sensor-b".to_string(),
        ]
    );
    assert_eq!(agent.runtime.names(), vec!["gateway", "sensor-b"]);
}

#[tokio::test]
async fn test_runtime_outage_is_retried_before_planning() {
    let agent = Agent::new().await;
    agent.runtime.fail_list(1);
    agent.channel.set_desired(document(1, "1.0.0", vec![sensor_a()]));

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Succeeded);
    assert!(summary.errors.is_empty());
    assert_eq!(agent.runtime.names(), vec!["sensor-a"]);

    let outcomes = agent.channel.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Succeeded);
}

#[tokio::test]
async fn test_persistent_runtime_outage_fails_after_retries() {
    let agent = Agent::new().await;
    agent.runtime.fail_list(10);
    agent.channel.set_desired(document(1, "1.0.0", vec![sensor_a()]));

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Failed);
    assert!(summary.actions.is_empty());
    assert!(summary.errors[0].contains("Runtime unavailable"));

    // two planning attempts, then the best-effort current state read
    assert_eq!(*agent.runtime.list_calls.lock().unwrap(), 3);
    assert!(agent.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_converged_device_takes_no_action() {
    let agent = Agent::new().await;
    agent.channel.set_desired(document(1, "1.0.0", vec![sensor_a()]));
    agent.cycle().await;
    agent.runtime.clear_calls();

    let summary = agent.cycle().await;
    assert_eq!(summary.source, DesiredStateSource::NotModified);
    assert!(summary.actions.is_empty());
    assert_eq!(summary.status, OutcomeStatus::Succeeded);
    assert!(agent.runtime.calls().is_empty());

    // conditional fetch carries the cached generation
    assert_eq!(agent.channel.fetches.lock().unwrap().last(), Some(&Some(1)));

    let outcomes = agent.channel.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_ne!(outcomes[0].cycle_id, outcomes[1].cycle_id);
}

#[tokio::test]
async fn test_optional_failure_is_partial() {
    let agent = Agent::new().await;
    let mut optional_gateway = gateway();
    optional_gateway.optional = true;
    agent
        .channel
        .set_desired(document(1, "2.0.0", vec![sensor_b(), optional_gateway]));
    agent.runtime.fail_start("gateway", 10, false);

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Partial);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("start gateway"));
    assert_eq!(agent.runtime.names(), vec!["sensor-b"]);

    // partial still counts as running the bundle
    let current = agent.channel.last_current_state().unwrap();
    assert_eq!(current.bundle_version.as_deref(), Some("2.0.0"));
    assert_eq!(agent.channel.outcomes()[0].status, OutcomeStatus::Partial);
}

#[tokio::test]
async fn test_required_failure_fails_cycle() {
    let agent = Agent::new().await;
    agent
        .channel
        .set_desired(document(1, "2.0.0", vec![sensor_b(), gateway()]));
    agent.runtime.fail_start("sensor-b", 10, false);

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Failed);

    // permanent errors are not retried
    let start = action(&summary.actions, ActionKind::Start, "sensor-b");
    assert_eq!(start.status, ActionStatus::Failed);
    assert_eq!(start.attempts, 1);

    let current = agent.channel.last_current_state().unwrap();
    assert!(current.bundle_version.is_none());

    let status = agent.reconciler().status();
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let agent = Agent::new().await;
    agent.channel.set_desired(document(1, "2.0.0", vec![sensor_b()]));
    agent.runtime.fail_start("sensor-b", 2, true);

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Succeeded);
    let start = action(&summary.actions, ActionKind::Start, "sensor-b");
    assert_eq!(start.status, ActionStatus::Succeeded);
    assert_eq!(start.attempts, 3);
    assert!(start.error.is_none());

    let starts = agent
        .runtime
        .calls()
        .iter()
        .filter(|c| *c == "start sensor-b")
        .count();
    assert_eq!(starts, 3);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let agent = Agent::new().await;
    agent.channel.set_desired(document(1, "2.0.0", vec![sensor_b()]));
    agent.runtime.fail_start("sensor-b", 10, true);

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Failed);
    let start = action(&summary.actions, ActionKind::Start, "sensor-b");
    assert_eq!(start.attempts, 3);
    assert!(start.error.as_deref().unwrap().contains("exit 1"));
}

#[tokio::test]
async fn test_failed_stop_blocks_replacement() {
    let agent = Agent::new().await;
    agent.runtime.seed_with_hash(&sensor_b(), "stale", "running");
    agent
        .channel
        .set_desired(document(1, "2.0.0", vec![sensor_b(), gateway()]));
    agent.runtime.fail_stop("sensor-b", 10, false);

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Failed);

    let stop = action(&summary.actions, ActionKind::Stop, "sensor-b");
    assert_eq!(stop.status, ActionStatus::Failed);

    let start = action(&summary.actions, ActionKind::Start, "sensor-b");
    assert_eq!(start.status, ActionStatus::Failed);
    assert_eq!(start.attempts, 0);
    assert!(start.error.as_deref().unwrap().contains("blocked"));

    let gateway_start = action(&summary.actions, ActionKind::Start, "gateway");
    assert_eq!(gateway_start.status, ActionStatus::Succeeded);
    assert!(!agent.runtime.calls().contains(&"start sensor-b".to_string()));
}

#[tokio::test]
async fn test_unreachable_cloud_enforces_cache() {
    let agent = Agent::new().await;
    agent.channel.set_desired(document(1, "1.0.0", vec![sensor_a()]));
    agent.cycle().await;

    agent.channel.set_offline(true);
    agent.runtime.kill("sensor-a");

    let summary = agent.cycle().await;
    assert_eq!(summary.source, DesiredStateSource::Cache);
    assert_eq!(summary.generation, 1);
    assert_eq!(summary.status, OutcomeStatus::Succeeded);
    assert_eq!(agent.runtime.names(), vec!["sensor-a"]);

    // fetched once, retried once
    assert_eq!(agent.channel.fetches.lock().unwrap().len(), 3);
    assert_eq!(agent.reconciler().outbox().len().await, 1);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let first = Agent::new().await;
    first.channel.set_desired(document(4, "1.0.0", vec![sensor_a()]));
    first.cycle().await;

    let Agent {
        dir,
        channel,
        runtime,
        ..
    } = first;
    channel.set_offline(true);
    runtime.kill("sensor-a");

    let restarted = Agent::in_dir(dir, channel, runtime).await;
    assert_eq!(restarted.reconciler().cache().generation(), Some(4));

    let summary = restarted.cycle().await;
    assert_eq!(summary.source, DesiredStateSource::Cache);
    assert_eq!(restarted.runtime.names(), vec!["sensor-a"]);
}

#[tokio::test]
async fn test_unreachable_cloud_without_cache_errors() {
    let agent = Agent::new().await;
    agent.channel.set_offline(true);

    let err = agent.reconciler().run_cycle().await.unwrap_err();
    assert!(matches!(err, AgentError::ChannelError { status: 503, .. }));
    assert!(agent.runtime.calls().is_empty());
    assert!(agent.channel.outcomes().is_empty());

    let status = agent.reconciler().status();
    assert!(!status.running);
    assert_eq!(status.consecutive_failures, 1);
}

#[tokio::test]
async fn test_checksum_mismatch_fetches_bundle_definition() {
    let agent = Agent::new().await;
    let mut tampered = document(1, "2.0.0", vec![sensor_b(), gateway()]);
    tampered.containers[0].image = "registry.evil/sensor:2".to_string();
    agent.channel.set_desired(tampered);
    agent
        .channel
        .set_definition(definition("2.0.0", vec![sensor_b(), gateway()]));

    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Succeeded);
    assert_eq!(*agent.channel.definition_fetches.lock().unwrap(), 1);

    let calls = agent.runtime.calls();
    assert!(calls.contains(&"pull registry.local/sensor:2".to_string()));
    assert!(!calls.iter().any(|c| c.contains("registry.evil")));

    // the corrected document is what gets cached
    let cached = agent.reconciler().cache().get().unwrap();
    assert!(cached.document.is_intact());
}

#[tokio::test]
async fn test_bundle_definition_must_match_checksum() {
    let agent = Agent::new().await;
    let mut tampered = document(1, "2.0.0", vec![sensor_b()]);
    tampered.containers[0].image = "registry.evil/sensor:2".to_string();
    agent.channel.set_desired(tampered);
    agent
        .channel
        .set_definition(definition("2.0.0", vec![sensor_a()]));

    let err = agent.reconciler().run_cycle().await.unwrap_err();
    assert!(matches!(err, AgentError::ValidationError(_)));
    assert!(agent.runtime.names().is_empty());
}

#[tokio::test]
async fn test_cancelled_cycle_reports_nothing() {
    let gate = Arc::new(Semaphore::new(0));
    let agent = Agent::with_runtime(FakeRuntime::gated(gate.clone())).await;
    agent
        .channel
        .set_desired(document(1, "2.0.0", vec![sensor_b(), gateway()]));

    let reconciler = agent.state.reconciler.clone();
    let cycle = tokio::spawn(async move { reconciler.run_cycle().await });

    agent.runtime.start_entered.notified().await;
    agent.reconciler().cancel();
    gate.add_permits(10);

    let result = cycle.await.unwrap().unwrap();
    assert!(matches!(result, CycleResult::Cancelled { .. }));
    assert!(agent.channel.outcomes().is_empty());
    assert!(agent.channel.last_current_state().is_none());
    assert!(agent.reconciler().outbox().is_empty().await);

    // the next cycle starts from what actually runs
    let summary = agent.cycle().await;
    assert_eq!(summary.status, OutcomeStatus::Succeeded);
    assert_eq!(agent.runtime.names(), vec!["gateway", "sensor-b"]);
    assert_eq!(agent.channel.outcomes().len(), 1);
}
