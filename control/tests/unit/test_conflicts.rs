//! Device claim conflict tests

use fleet_control::errors::ControlError;
use fleet_control::events::log::RolloutEventKind;
use fleet_control::models::rollout::{DeviceSelector, RolloutStatus};
use fleet_control::rollout::orchestrator::{ConflictPolicy, OrchestratorOptions};
use openapi_client::models::OutcomeStatus;
use tokio_test::{assert_err, assert_ok};

use crate::harness::{device, half_and_half, Fleet};

#[tokio::test]
async fn test_overlapping_rollout_is_rejected() {
    let fleet = Fleet::new(6);
    let first = fleet.start(fleet.request("2.0.0", half_and_half())).await;

    let mut overlapping = fleet.request("1.0.0", half_and_half());
    overlapping.device_selector = DeviceSelector::Devices(vec![device(1), device(4)]);
    let err = assert_err!(fleet.state.orchestrator.start_rollout(overlapping).await);

    match err {
        ControlError::Conflict { details, .. } => {
            let details = details.unwrap();
            assert_eq!(details["devices"][0], "dev-01");
            assert_eq!(details["rollouts"][0], first.rollout.id.to_string());
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // Nothing about the first rollout changed
    assert_eq!(
        fleet.state.orchestrator.claim_of(&device(1)),
        Some(first.rollout.id.clone())
    );
    assert_eq!(
        fleet.state.orchestrator.list_rollouts(&fleet.tenant).await.len(),
        1
    );
}

#[tokio::test]
async fn test_disjoint_rollouts_run_side_by_side() {
    let fleet = Fleet::new(6);
    let mut left = fleet.request("2.0.0", half_and_half());
    left.device_selector = DeviceSelector::Devices(vec![device(0), device(1), device(2)]);
    let mut right = fleet.request("2.0.0", half_and_half());
    right.device_selector = DeviceSelector::Devices(vec![device(3), device(4), device(5)]);

    assert_ok!(fleet.state.orchestrator.start_rollout(left).await);
    assert_ok!(fleet.state.orchestrator.start_rollout(right).await);
    assert_eq!(fleet.state.orchestrator.active_rollouts().await.len(), 2);
}

#[tokio::test]
async fn test_supersede_cancels_older_rollout() {
    let fleet = Fleet::with_options(
        6,
        OrchestratorOptions {
            conflict_policy: ConflictPolicy::Supersede,
            ..Default::default()
        },
    );
    let older = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;
    let newer = fleet.start(fleet.request("1.0.0", half_and_half())).await.rollout.id;

    assert_eq!(
        fleet.snapshot(&older).await.rollout.status,
        RolloutStatus::Cancelled
    );
    assert_eq!(fleet.state.orchestrator.claim_of(&device(5)), Some(newer.clone()));

    let last = fleet.state.events.for_rollout(&older).pop().unwrap();
    assert!(matches!(&last.kind, RolloutEventKind::Superseded { by } if by == &newer));

    // Reports for the superseded rollout are recorded but change nothing
    fleet.report(&older, &device(0), OutcomeStatus::Succeeded).await;
    let desired = fleet.state.desired.desired_state(&device(0));
    assert_eq!(desired.bundle.unwrap().version, "1.0.0");
    assert!(fleet.state.desired.last_known_good(&device(0)).is_none());
}

#[tokio::test]
async fn test_finished_rollout_frees_devices() {
    let fleet = Fleet::new(2);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;
    fleet.report(&id, &device(0), OutcomeStatus::Succeeded).await;
    fleet.report(&id, &device(1), OutcomeStatus::Succeeded).await;
    assert_eq!(
        fleet.snapshot(&id).await.rollout.status,
        RolloutStatus::Completed
    );

    assert_ok!(
        fleet
            .state
            .orchestrator
            .start_rollout(fleet.request("1.0.0", half_and_half()))
            .await
    );
}
