//! Shared fleet fixture

use std::sync::Arc;

use fleet_control::app::options::AppOptions;
use fleet_control::app::state::AppState;
use fleet_control::fleet::directory::InMemoryDirectory;
use fleet_control::ids::{BundleId, DeviceId, RolloutId, TenantId};
use fleet_control::models::rollout::{DeviceSelector, PhasePlan, PhaseSelection};
use fleet_control::rollout::orchestrator::{
    DeviceOutcome, OrchestratorOptions, OutcomeAck, RolloutSnapshot, StartRollout,
};
use openapi_client::models::{ContainerSpec, OutcomeStatus};

pub const TENANT: &str = "acme";
pub const BUNDLE: &str = "telemetry";

pub struct Fleet {
    pub state: AppState,
    pub directory: Arc<InMemoryDirectory>,
    pub tenant: TenantId,
    pub bundle: BundleId,
}

impl Fleet {
    /// A tenant with `size` devices (dev-00 ...) and bundle versions 1.0.0 and 2.0.0
    pub fn new(size: usize) -> Self {
        Self::with_options(size, OrchestratorOptions::default())
    }

    pub fn with_options(size: usize, orchestrator: OrchestratorOptions) -> Self {
        let tenant = TenantId::new(TENANT);
        let bundle = BundleId::new(BUNDLE);
        let directory = Arc::new(InMemoryDirectory::new());
        for i in 0..size {
            let site = if i % 2 == 0 { "oslo" } else { "bergen" };
            directory.add_device(&tenant, &device(i), &[("site", site)]);
        }

        let options = AppOptions {
            orchestrator,
            ..Default::default()
        };
        let state = AppState::with_directory(&options, directory.clone());

        state
            .registry
            .register(
                &tenant,
                &bundle,
                "1.0.0",
                vec![ContainerSpec::new("sensor-a", "registry.local/sensor:1")],
            )
            .unwrap();
        state
            .registry
            .register(
                &tenant,
                &bundle,
                "2.0.0",
                vec![
                    ContainerSpec::new("sensor-b", "registry.local/sensor:2"),
                    ContainerSpec::new("gateway", "registry.local/gateway:2"),
                ],
            )
            .unwrap();

        Self {
            state,
            directory,
            tenant,
            bundle,
        }
    }

    pub fn request(&self, version: &str, phases: Vec<PhasePlan>) -> StartRollout {
        StartRollout {
            tenant_id: self.tenant.clone(),
            bundle_id: self.bundle.clone(),
            version: version.to_string(),
            previous_version: None,
            device_selector: DeviceSelector::All,
            phases,
            auto_rollback: false,
        }
    }

    pub async fn start(&self, request: StartRollout) -> RolloutSnapshot {
        self.state.orchestrator.start_rollout(request).await.unwrap()
    }

    pub async fn report(
        &self,
        rollout_id: &RolloutId,
        device_id: &DeviceId,
        status: OutcomeStatus,
    ) -> OutcomeAck {
        self.state
            .orchestrator
            .record_device_outcome(rollout_id, device_id, outcome(status))
            .await
            .unwrap()
    }

    pub async fn snapshot(&self, rollout_id: &RolloutId) -> RolloutSnapshot {
        self.state
            .orchestrator
            .rollout_status(rollout_id)
            .await
            .unwrap()
    }
}

pub fn device(i: usize) -> DeviceId {
    DeviceId::new(format!("dev-{:02}", i))
}

pub fn half_and_half() -> Vec<PhasePlan> {
    vec![
        PhasePlan::new(PhaseSelection::Percentage(50.0), 0.8, 0.3),
        PhasePlan::new(PhaseSelection::Percentage(50.0), 0.8, 0.3),
    ]
}

pub fn outcome(status: OutcomeStatus) -> DeviceOutcome {
    let errors = match status {
        OutcomeStatus::Failed => vec!["pull registry.local/sensor:2 timed out".to_string()],
        _ => Vec::new(),
    };
    DeviceOutcome {
        status,
        cycle_id: next_cycle_id(),
        phase_number: None,
        errors,
        detail: None,
    }
}

fn next_cycle_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    format!("cycle-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}
