//! Device outcome reporting tests

use fleet_control::ids::DeviceId;
use fleet_control::models::assignment::AssignmentStatus;
use fleet_control::rollout::orchestrator::DeviceOutcome;
use openapi_client::models::OutcomeStatus;

use crate::harness::{device, half_and_half, outcome, Fleet};

#[tokio::test]
async fn test_retransmitted_outcome_is_acknowledged_once() {
    let fleet = Fleet::new(10);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;

    let report = DeviceOutcome {
        cycle_id: "cycle-abc".to_string(),
        ..outcome(OutcomeStatus::Succeeded)
    };
    let first = fleet
        .state
        .orchestrator
        .record_device_outcome(&id, &device(0), report.clone())
        .await
        .unwrap();
    let revision = fleet.snapshot(&id).await.rollout.revision;
    let second = fleet
        .state
        .orchestrator
        .record_device_outcome(&id, &device(0), report)
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(fleet.snapshot(&id).await.rollout.revision, revision);
    assert_eq!(fleet.snapshot(&id).await.phase_counts[0].succeeded, 1);
}

#[tokio::test]
async fn test_contradicting_outcome_is_a_conflict() {
    let fleet = Fleet::new(10);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;
    fleet.report(&id, &device(0), OutcomeStatus::Succeeded).await;

    let err = fleet
        .state
        .orchestrator
        .record_device_outcome(&id, &device(0), outcome(OutcomeStatus::Failed))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "conflict");

    let statuses = fleet.state.orchestrator.device_statuses(&id).await.unwrap();
    assert_eq!(statuses[0].device_id, device(0));
    assert_eq!(statuses[0].status, AssignmentStatus::Succeeded);
}

#[tokio::test]
async fn test_outcome_for_wrong_phase_is_a_conflict() {
    let fleet = Fleet::new(10);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;

    let err = fleet
        .state
        .orchestrator
        .record_device_outcome(
            &id,
            &device(1),
            DeviceOutcome {
                phase_number: Some(2),
                ..outcome(OutcomeStatus::Succeeded)
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "conflict");
}

#[tokio::test]
async fn test_outcome_without_assignment_is_not_found() {
    let fleet = Fleet::new(10);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;

    // dev-07 belongs to phase 2, which has not started
    let err = fleet
        .state
        .orchestrator
        .record_device_outcome(&id, &device(7), outcome(OutcomeStatus::Succeeded))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    let err = fleet
        .state
        .orchestrator
        .record_device_outcome(&id, &DeviceId::new("ghost"), outcome(OutcomeStatus::Failed))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_partial_outcome_counts_as_success() {
    let fleet = Fleet::new(2);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;
    fleet.report(&id, &device(0), OutcomeStatus::Partial).await;

    let snapshot = fleet.snapshot(&id).await;
    assert_eq!(snapshot.phase_counts[0].succeeded, 1);
    assert_eq!(
        fleet
            .state
            .desired
            .last_known_good(&device(0))
            .unwrap()
            .bundle
            .version
            .to_string(),
        "2.0.0"
    );
}

#[tokio::test]
async fn test_delivery_marks_assignment_reconciling() {
    let fleet = Fleet::new(2);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;

    fleet
        .state
        .orchestrator
        .note_desired_state_delivered(&device(0), &id)
        .await
        .unwrap();
    let snapshot = fleet.snapshot(&id).await;
    assert_eq!(snapshot.phase_counts[0].reconciling, 1);
    assert_eq!(snapshot.phase_counts[0].assigned, 0);
}
