//! Rollout lifecycle tests

use fleet_control::events::log::RolloutEventKind;
use fleet_control::models::assignment::AssignmentStatus;
use fleet_control::models::rollout::{
    PhasePlan, PhaseSelection, PhaseStatus, RolloutKind, RolloutStatus,
};
use fleet_control::rollout::orchestrator::DEVICE_UNAVAILABLE;
use openapi_client::models::OutcomeStatus;

use crate::harness::{device, half_and_half, Fleet};

#[tokio::test]
async fn test_two_phase_rollout_completes() {
    let fleet = Fleet::new(10);
    let started = fleet.start(fleet.request("2.0.0", half_and_half())).await;
    let id = started.rollout.id.clone();

    assert_eq!(started.rollout.status, RolloutStatus::InProgress);
    assert_eq!(started.rollout.population.len(), 10);
    assert_eq!(started.rollout.phases[0].status, PhaseStatus::InProgress);
    assert_eq!(
        started.rollout.phases[0].devices,
        (0..5).map(device).collect::<Vec<_>>()
    );
    assert_eq!(started.rollout.phases[1].status, PhaseStatus::Pending);
    assert_eq!(started.phase_counts[0].assigned, 5);

    // 4 of 5 succeed, 1 fails: 0.8 >= completion and 0.2 <= failure
    for i in 0..4 {
        fleet.report(&id, &device(i), OutcomeStatus::Succeeded).await;
    }
    let waiting = fleet.snapshot(&id).await;
    assert_eq!(waiting.rollout.phases[0].status, PhaseStatus::InProgress);

    fleet.report(&id, &device(4), OutcomeStatus::Failed).await;
    let phase_two = fleet.snapshot(&id).await;
    assert_eq!(phase_two.rollout.phases[0].status, PhaseStatus::Completed);
    assert_eq!(phase_two.rollout.phases[1].status, PhaseStatus::InProgress);
    assert_eq!(
        phase_two.rollout.phases[1].devices,
        (5..10).map(device).collect::<Vec<_>>()
    );

    for i in 5..10 {
        fleet.report(&id, &device(i), OutcomeStatus::Succeeded).await;
    }
    let done = fleet.snapshot(&id).await;
    assert_eq!(done.rollout.status, RolloutStatus::Completed);
    assert_eq!(done.rollout.phases[1].status, PhaseStatus::Completed);
    assert!(fleet.state.orchestrator.claim_of(&device(0)).is_none());

    let names: Vec<&str> = fleet
        .state
        .events
        .for_rollout(&id)
        .iter()
        .map(|e| e.kind.name())
        .collect();
    assert_eq!(
        names,
        vec![
            "started",
            "phase_started",
            "phase_completed",
            "phase_started",
            "phase_completed",
            "completed"
        ]
    );
}

#[tokio::test]
async fn test_failed_phase_rolls_back_to_previous_version() {
    let fleet = Fleet::new(10);
    let mut request = fleet.request("2.0.0", half_and_half());
    request.auto_rollback = true;
    let id = fleet.start(request).await.rollout.id;

    fleet.report(&id, &device(0), OutcomeStatus::Failed).await;
    assert_eq!(fleet.snapshot(&id).await.rollout.status, RolloutStatus::InProgress);

    // 2 of 5 failed exceeds the 0.3 failure threshold
    fleet.report(&id, &device(1), OutcomeStatus::Failed).await;
    let failed = fleet.snapshot(&id).await;
    assert_eq!(failed.rollout.status, RolloutStatus::Failed);
    assert_eq!(failed.rollout.phases[0].status, PhaseStatus::Failed);
    assert_eq!(failed.rollout.phases[1].status, PhaseStatus::Pending);

    let failure = failed.rollout.failure.clone().unwrap();
    assert_eq!(failure.phase_number, 1);
    assert_eq!(failure.failing_devices, vec![device(0), device(1)]);
    assert!(failure.errors[0].starts_with("dev-00: "));

    let rollback_id = failed.rollout.rollback_rollout_id.clone().unwrap();
    let rollback = fleet.snapshot(&rollback_id).await;
    assert_eq!(rollback.rollout.kind, RolloutKind::Rollback { of: id.clone() });
    assert_eq!(rollback.rollout.status, RolloutStatus::InProgress);
    assert_eq!(rollback.rollout.bundle.version.to_string(), "1.0.0");
    assert_eq!(
        rollback.rollout.phases[0].devices,
        (0..5).map(device).collect::<Vec<_>>()
    );

    // Devices outside phase 1 were never touched
    assert_eq!(fleet.state.orchestrator.claim_of(&device(2)), Some(rollback_id.clone()));
    assert!(fleet.state.orchestrator.claim_of(&device(7)).is_none());

    let desired = fleet.state.desired.desired_state(&device(2));
    assert_eq!(desired.bundle.unwrap().version, "1.0.0");
    assert_eq!(
        desired.assignment.unwrap().rollout_id,
        rollback_id.to_string()
    );

    for i in 0..5 {
        fleet.report(&rollback_id, &device(i), OutcomeStatus::Succeeded).await;
    }
    assert_eq!(
        fleet.snapshot(&rollback_id).await.rollout.status,
        RolloutStatus::Completed
    );
    assert_eq!(
        fleet.snapshot(&id).await.rollout.status,
        RolloutStatus::RolledBack
    );

    let last = fleet.state.events.for_rollout(&id).pop().unwrap();
    assert!(matches!(&last.kind, RolloutEventKind::RolledBack { by } if by == &rollback_id));
}

#[tokio::test]
async fn test_failed_without_auto_rollback_keeps_last_known_good() {
    let fleet = Fleet::new(4);
    let id = fleet
        .start(fleet.request(
            "2.0.0",
            vec![PhasePlan::new(PhaseSelection::Percentage(100.0), 1.0, 0.0)],
        ))
        .await
        .rollout
        .id;

    fleet.report(&id, &device(0), OutcomeStatus::Failed).await;
    let failed = fleet.snapshot(&id).await;
    assert_eq!(failed.rollout.status, RolloutStatus::Failed);
    assert!(failed.rollout.rollback_rollout_id.is_none());

    // Devices that never reported fall back to their (empty) last known good
    let desired = fleet.state.desired.desired_state(&device(3));
    assert!(desired.bundle.is_none());
    assert!(desired.assignment.is_none());
    assert!(desired.generation > 1);
}

#[tokio::test]
async fn test_completion_out_of_reach_fails_phase() {
    let fleet = Fleet::new(4);
    let id = fleet
        .start(fleet.request(
            "2.0.0",
            vec![PhasePlan::new(PhaseSelection::Percentage(100.0), 1.0, 0.5)],
        ))
        .await
        .rollout
        .id;

    for i in 0..3 {
        fleet.report(&id, &device(i), OutcomeStatus::Succeeded).await;
    }
    fleet.report(&id, &device(3), OutcomeStatus::Failed).await;

    // 0.25 failed stays under 0.5, but 0.75 succeeded never reaches 1.0
    let snapshot = fleet.snapshot(&id).await;
    assert_eq!(snapshot.rollout.status, RolloutStatus::Failed);
}

#[tokio::test]
async fn test_advance_is_idempotent() {
    let fleet = Fleet::new(10);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;
    let before = fleet.snapshot(&id).await.rollout.revision;

    let first = fleet.state.orchestrator.advance_phase_if_ready(&id).await.unwrap();
    let second = fleet.state.orchestrator.advance_phase_if_ready(&id).await.unwrap();
    assert_eq!(first.rollout.revision, before);
    assert_eq!(second.rollout.revision, before);
    assert_eq!(second.rollout.phases[1].status, PhaseStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_advance_does_not_restart_phase() {
    let fleet = Fleet::new(10);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;
    fleet.state.orchestrator.pause_rollout(&id).await.unwrap();
    for i in 0..5 {
        fleet.report(&id, &device(i), OutcomeStatus::Succeeded).await;
    }
    fleet.state.orchestrator.resume_rollout(&id).await.unwrap();

    let orchestrator = fleet.state.orchestrator.clone();
    let (a, b) = tokio::join!(
        orchestrator.advance_phase_if_ready(&id),
        orchestrator.advance_phase_if_ready(&id)
    );
    assert_eq!(a.unwrap().rollout.revision, b.unwrap().rollout.revision);

    let started = fleet
        .state
        .events
        .for_rollout(&id)
        .iter()
        .filter(|e| matches!(e.kind, RolloutEventKind::PhaseStarted { phase: 2, .. }))
        .count();
    assert_eq!(started, 1);
}

#[tokio::test]
async fn test_paused_rollout_never_advances() {
    let fleet = Fleet::new(10);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;

    let paused = fleet.state.orchestrator.pause_rollout(&id).await.unwrap();
    assert_eq!(paused.rollout.status, RolloutStatus::Paused);

    for i in 0..5 {
        fleet.report(&id, &device(i), OutcomeStatus::Succeeded).await;
    }
    fleet.state.orchestrator.advance_phase_if_ready(&id).await.unwrap();
    let still = fleet.snapshot(&id).await;
    assert_eq!(still.rollout.status, RolloutStatus::Paused);
    assert_eq!(still.rollout.phases[0].status, PhaseStatus::InProgress);
    assert_eq!(still.phase_counts[0].succeeded, 5);

    let resumed = fleet.state.orchestrator.resume_rollout(&id).await.unwrap();
    assert_eq!(resumed.rollout.status, RolloutStatus::InProgress);
    assert_eq!(resumed.rollout.phases[0].status, PhaseStatus::Completed);
    assert_eq!(resumed.rollout.phases[1].status, PhaseStatus::InProgress);
}

#[tokio::test]
async fn test_cancel_releases_devices() {
    let fleet = Fleet::new(4);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;
    assert!(fleet.state.desired.desired_state(&device(0)).bundle.is_some());

    let cancelled = fleet.state.orchestrator.cancel_rollout(&id).await.unwrap();
    assert_eq!(cancelled.rollout.status, RolloutStatus::Cancelled);
    assert!(fleet.state.orchestrator.claim_of(&device(0)).is_none());
    assert!(fleet.state.desired.desired_state(&device(0)).bundle.is_none());

    let again = fleet.state.orchestrator.cancel_rollout(&id).await;
    assert_eq!(again.unwrap_err().code(), "invalid_transition");
}

#[tokio::test]
async fn test_phases_follow_their_selections() {
    let fleet = Fleet::new(10);
    let phases = vec![
        PhasePlan::new(PhaseSelection::Devices(vec![device(3)]), 1.0, 0.0),
        PhasePlan::new(PhaseSelection::Tags("site=oslo".to_string()), 0.8, 0.3),
        PhasePlan::new(PhaseSelection::Percentage(100.0), 0.8, 0.3),
    ];
    let id = fleet.start(fleet.request("2.0.0", phases)).await.rollout.id;

    let first = fleet.snapshot(&id).await;
    assert_eq!(first.rollout.phases[0].devices, vec![device(3)]);
    assert!(first.rollout.phases[1].devices.is_empty());
    assert_eq!(
        fleet.state.desired.desired_state(&device(4)).bundle,
        None,
        "later phases are not assigned early"
    );

    fleet.report(&id, &device(3), OutcomeStatus::Succeeded).await;
    let second = fleet.snapshot(&id).await;
    assert_eq!(
        second.rollout.phases[1].devices,
        vec![device(0), device(2), device(4), device(6), device(8)]
    );

    for i in [0, 2, 4, 6, 8] {
        fleet.report(&id, &device(i), OutcomeStatus::Succeeded).await;
    }
    let third = fleet.snapshot(&id).await;
    assert_eq!(
        third.rollout.phases[2].devices,
        vec![device(1), device(5), device(7), device(9)]
    );
}

#[tokio::test]
async fn test_empty_phase_is_skipped() {
    let fleet = Fleet::new(4);
    let phases = vec![
        PhasePlan::new(PhaseSelection::Tags("site=tromso".to_string()), 1.0, 0.0),
        PhasePlan::new(PhaseSelection::Percentage(100.0), 1.0, 0.0),
    ];
    let snapshot = fleet.start(fleet.request("2.0.0", phases)).await;

    assert_eq!(snapshot.rollout.phases[0].status, PhaseStatus::Skipped);
    assert_eq!(snapshot.rollout.phases[1].status, PhaseStatus::InProgress);
    assert_eq!(snapshot.rollout.phases[1].devices.len(), 4);
}

#[tokio::test]
async fn test_device_leaving_fleet_fails_its_assignment() {
    let fleet = Fleet::new(10);
    let id = fleet.start(fleet.request("2.0.0", half_and_half())).await.rollout.id;
    fleet.directory.remove_device(&device(5));

    for i in 0..5 {
        fleet.report(&id, &device(i), OutcomeStatus::Succeeded).await;
    }

    let statuses = fleet.state.orchestrator.device_statuses(&id).await.unwrap();
    let gone = statuses.iter().find(|a| a.device_id == device(5)).unwrap();
    assert_eq!(gone.status, AssignmentStatus::Failed);
    assert_eq!(gone.last_error.as_deref(), Some(DEVICE_UNAVAILABLE));

    for i in 6..10 {
        fleet.report(&id, &device(i), OutcomeStatus::Succeeded).await;
    }
    assert_eq!(
        fleet.snapshot(&id).await.rollout.status,
        RolloutStatus::Completed
    );
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let fleet = Fleet::new(4);

    let unknown = fleet
        .state
        .orchestrator
        .start_rollout(fleet.request("9.9.9", half_and_half()))
        .await;
    assert_eq!(unknown.unwrap_err().code(), "not_found");

    let no_phases = fleet
        .state
        .orchestrator
        .start_rollout(fleet.request("2.0.0", vec![]))
        .await;
    assert_eq!(no_phases.unwrap_err().code(), "validation");

    let mut no_previous = fleet.request("1.0.0", half_and_half());
    no_previous.auto_rollback = true;
    let result = fleet.state.orchestrator.start_rollout(no_previous).await;
    assert_eq!(result.unwrap_err().code(), "validation");

    assert!(fleet.state.orchestrator.list_rollouts(&fleet.tenant).await.is_empty());
}
