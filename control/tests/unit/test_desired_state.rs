//! Desired state tests

use fleet_control::models::bundle::BundleKey;
use fleet_control::models::rollout::{PhasePlan, PhaseSelection, RolloutStatus};
use fleet_control::registry::bundles::{BundleVersionRegistry, ConditionalFetch};
use openapi_client::models::{ContainerSpec, OutcomeStatus};

use crate::harness::{device, Fleet};

fn single_phase() -> Vec<PhasePlan> {
    vec![PhasePlan::new(PhaseSelection::Percentage(100.0), 1.0, 0.0)]
}

#[tokio::test]
async fn test_failed_upgrade_returns_to_last_known_good() {
    let fleet = Fleet::new(1);
    let first = fleet.start(fleet.request("2.0.0", single_phase())).await.rollout.id;
    fleet.report(&first, &device(0), OutcomeStatus::Succeeded).await;
    assert_eq!(
        fleet.snapshot(&first).await.rollout.status,
        RolloutStatus::Completed
    );

    let settled = fleet.state.desired.desired_state(&device(0));
    assert_eq!(settled.bundle.as_ref().unwrap().version, "2.0.0");
    assert!(settled.assignment.is_none());

    fleet
        .state
        .registry
        .register(
            &fleet.tenant,
            &fleet.bundle,
            "3.0.0",
            vec![ContainerSpec::new("sensor-c", "registry.local/sensor:3")],
        )
        .unwrap();
    let second = fleet.start(fleet.request("3.0.0", single_phase())).await.rollout.id;
    let upgrading = fleet.state.desired.desired_state(&device(0));
    assert_eq!(upgrading.bundle.as_ref().unwrap().version, "3.0.0");
    assert!(upgrading.generation > settled.generation);

    fleet.report(&second, &device(0), OutcomeStatus::Failed).await;
    assert_eq!(
        fleet.snapshot(&second).await.rollout.status,
        RolloutStatus::Failed
    );

    let reverted = fleet.state.desired.desired_state(&device(0));
    assert_eq!(reverted.bundle.as_ref().unwrap().version, "2.0.0");
    assert_eq!(reverted.containers.len(), 2);
    assert!(reverted.generation > upgrading.generation);
}

#[tokio::test]
async fn test_untouched_device_has_empty_state() {
    let fleet = Fleet::new(1);
    let desired = fleet.state.desired.desired_state(&device(0));
    assert_eq!(desired.generation, 0);
    assert!(desired.bundle.is_none());
    assert!(desired.containers.is_empty());
}

#[tokio::test]
async fn test_served_containers_match_registered_checksum() {
    let fleet = Fleet::new(1);
    fleet.start(fleet.request("2.0.0", single_phase())).await;

    let desired = fleet.state.desired.desired_state(&device(0));
    assert!(desired.is_intact());

    let bundle_ref = desired.bundle.unwrap();
    let key = BundleKey {
        tenant_id: fleet.tenant.clone(),
        bundle_id: fleet.bundle.clone(),
        version: BundleVersionRegistry::parse_version(&bundle_ref.version).unwrap(),
    };
    let registered = fleet.state.registry.get(&key).unwrap();
    assert_eq!(registered.checksum, bundle_ref.checksum);
    assert!(registered.definition().matches_checksum(&bundle_ref.checksum));

    match fleet
        .state
        .registry
        .get_if_changed(&key, Some(&bundle_ref.checksum))
        .unwrap()
    {
        ConditionalFetch::NotModified => {}
        ConditionalFetch::Modified(_) => panic!("checksum match must not refetch"),
    }
}
