//! Fake cloud channel and container runtime around a real reconciler

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_agent::app::options::{AppOptions, StorageOptions};
use fleet_agent::app::state::AppState;
use fleet_agent::errors::AgentError;
use fleet_agent::http::channel::CloudChannel;
use fleet_agent::reconcile::cycle::{CycleResult, CycleSummary, Reconciler, ReconcilerOptions};
use fleet_agent::reconcile::executor::ExecutorOptions;
use fleet_agent::reconcile::runtime::{ContainerRuntime, ManagedContainer};
use fleet_agent::storage::device::Device;
use fleet_agent::storage::layout::StorageLayout;
use fleet_agent::utils::CooldownOptions;
use openapi_client::models::{
    AssignmentRef, BundleDefinition, BundleRef, ContainerSpec, CurrentStateReport,
    DesiredStateResponse, ReconciliationOutcomeReport, ReportAck,
};
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const DEVICE: &str = "dev-01";
pub const TENANT: &str = "acme";
pub const BUNDLE: &str = "telemetry";

pub fn sensor_a() -> ContainerSpec {
    ContainerSpec::new("sensor-a", "registry.local/sensor:1")
}

pub fn sensor_b() -> ContainerSpec {
    ContainerSpec::new("sensor-b", "registry.local/sensor:2")
}

pub fn gateway() -> ContainerSpec {
    ContainerSpec::new("gateway", "registry.local/gateway:2")
}

pub fn definition(version: &str, containers: Vec<ContainerSpec>) -> BundleDefinition {
    BundleDefinition {
        bundle_id: BUNDLE.to_string(),
        version: version.to_string(),
        containers,
    }
}

/// Intact document for `version`, assigned through rollout r-1 phase 1
pub fn document(generation: u64, version: &str, containers: Vec<ContainerSpec>) -> DesiredStateResponse {
    let checksum = definition(version, containers.clone())
        .compute_checksum()
        .unwrap();
    DesiredStateResponse {
        device_id: DEVICE.to_string(),
        generation,
        bundle: Some(BundleRef {
            tenant_id: TENANT.to_string(),
            bundle_id: BUNDLE.to_string(),
            version: version.to_string(),
            checksum,
        }),
        containers,
        assignment: Some(AssignmentRef {
            rollout_id: "r-1".to_string(),
            phase_number: 1,
        }),
    }
}

// ================================== CHANNEL ===================================== //

#[derive(Default)]
pub struct FakeChannel {
    desired: Mutex<Option<DesiredStateResponse>>,
    definition: Mutex<Option<BundleDefinition>>,

    /// Every request fails with 503
    offline: Mutex<bool>,

    /// Status returned for outcome reports
    outcome_status: Mutex<Option<u16>>,

    pub fetches: Mutex<Vec<Option<u64>>>,
    pub definition_fetches: Mutex<u32>,
    pub outcomes: Mutex<Vec<ReconciliationOutcomeReport>>,
    pub current_states: Mutex<Vec<CurrentStateReport>>,
}

impl FakeChannel {
    pub fn set_desired(&self, document: DesiredStateResponse) {
        *self.desired.lock().unwrap() = Some(document);
    }

    pub fn set_definition(&self, definition: BundleDefinition) {
        *self.definition.lock().unwrap() = Some(definition);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn reject_outcomes(&self, status: Option<u16>) {
        *self.outcome_status.lock().unwrap() = status;
    }

    pub fn outcomes(&self) -> Vec<ReconciliationOutcomeReport> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn last_current_state(&self) -> Option<CurrentStateReport> {
        self.current_states.lock().unwrap().last().cloned()
    }

    fn check_online(&self) -> Result<(), AgentError> {
        if *self.offline.lock().unwrap() {
            return Err(AgentError::ChannelError {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CloudChannel for FakeChannel {
    async fn fetch_desired_state(
        &self,
        known_generation: Option<u64>,
    ) -> Result<DesiredStateResponse, AgentError> {
        self.fetches.lock().unwrap().push(known_generation);
        self.check_online()?;
        match self.desired.lock().unwrap().clone() {
            Some(document) if Some(document.generation) == known_generation => {
                Err(AgentError::NotModified)
            }
            Some(document) => Ok(document),
            None => Ok(DesiredStateResponse::empty(DEVICE)),
        }
    }

    async fn fetch_bundle_definition(
        &self,
        bundle: &BundleRef,
    ) -> Result<BundleDefinition, AgentError> {
        *self.definition_fetches.lock().unwrap() += 1;
        self.check_online()?;
        self.definition
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentError::ChannelError {
                status: 404,
                message: format!("bundle {} not found", bundle.bundle_id),
            })
    }

    async fn report_current_state(
        &self,
        report: &CurrentStateReport,
    ) -> Result<ReportAck, AgentError> {
        self.check_online()?;
        self.current_states.lock().unwrap().push(report.clone());
        Ok(ReportAck {
            accepted: true,
            duplicate: false,
        })
    }

    async fn report_outcome(
        &self,
        report: &ReconciliationOutcomeReport,
    ) -> Result<ReportAck, AgentError> {
        self.check_online()?;
        if let Some(status) = *self.outcome_status.lock().unwrap() {
            return Err(AgentError::ChannelError {
                status,
                message: "rejected".to_string(),
            });
        }
        let mut outcomes = self.outcomes.lock().unwrap();
        let duplicate = outcomes.iter().any(|o| o.cycle_id == report.cycle_id);
        outcomes.push(report.clone());
        Ok(ReportAck {
            accepted: true,
            duplicate,
        })
    }
}

// ================================== RUNTIME ===================================== //

#[derive(Debug, Clone, Copy)]
struct Failure {
    remaining: u32,
    transient: bool,
}

impl Failure {
    fn error(&self, action: &str, name: &str) -> AgentError {
        if self.transient {
            AgentError::RuntimeError(format!("{} {}: exit 1", action, name))
        } else {
            AgentError::ValidationError(format!("{} {}: invalid reference format", action, name))
        }
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<BTreeMap<String, ManagedContainer>>,
    calls: Mutex<Vec<String>>,
    start_failures: Mutex<HashMap<String, Failure>>,
    stop_failures: Mutex<HashMap<String, Failure>>,

    /// Listings left to fail with the daemon unreachable
    list_failures: Mutex<u32>,
    pub list_calls: Mutex<u32>,

    /// When set, starts wait for a permit
    gate: Option<Arc<Semaphore>>,

    /// Notified whenever a start begins
    pub start_entered: Notify,
}

impl FakeRuntime {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    /// A running container created from `spec`
    pub fn seed(&self, spec: &ContainerSpec) {
        let hash = spec.spec_hash().unwrap();
        self.seed_with_hash(spec, &hash, "running");
    }

    pub fn seed_with_hash(&self, spec: &ContainerSpec, hash: &str, state: &str) {
        self.containers.lock().unwrap().insert(
            spec.name.clone(),
            ManagedContainer {
                name: spec.name.clone(),
                image: spec.image.clone(),
                spec_hash: Some(hash.to_string()),
                state: state.to_string(),
            },
        );
    }

    /// Remove a container behind the agent's back
    pub fn kill(&self, name: &str) {
        self.containers.lock().unwrap().remove(name);
    }

    pub fn fail_start(&self, name: &str, times: u32, transient: bool) {
        self.start_failures.lock().unwrap().insert(
            name.to_string(),
            Failure {
                remaining: times,
                transient,
            },
        );
    }

    pub fn fail_stop(&self, name: &str, times: u32, transient: bool) {
        self.stop_failures.lock().unwrap().insert(
            name.to_string(),
            Failure {
                remaining: times,
                transient,
            },
        );
    }

    pub fn fail_list(&self, times: u32) {
        *self.list_failures.lock().unwrap() = times;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn names(&self) -> Vec<String> {
        self.containers.lock().unwrap().keys().cloned().collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(failures: &Mutex<HashMap<String, Failure>>, name: &str) -> Option<Failure> {
        let mut failures = failures.lock().unwrap();
        let failure = failures.get_mut(name)?;
        if failure.remaining == 0 {
            return None;
        }
        failure.remaining -= 1;
        Some(*failure)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, AgentError> {
        *self.list_calls.lock().unwrap() += 1;
        {
            let mut failures = self.list_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AgentError::RuntimeUnavailable(
                    "Cannot connect to the Docker daemon".to_string(),
                ));
            }
        }
        Ok(self.containers.lock().unwrap().values().cloned().collect())
    }

    async fn pull_image(&self, image: &str, _timeout: Duration) -> Result<(), AgentError> {
        self.record(format!("pull {}", image));
        Ok(())
    }

    async fn start_container(&self, spec: &ContainerSpec, spec_hash: &str) -> Result<(), AgentError> {
        self.start_entered.notify_one();
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        self.record(format!("start {}", spec.name));
        if let Some(failure) = Self::take_failure(&self.start_failures, &spec.name) {
            return Err(failure.error("start", &spec.name));
        }
        self.seed_with_hash(spec, spec_hash, "running");
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), AgentError> {
        self.record(format!("stop {}", name));
        if let Some(failure) = Self::take_failure(&self.stop_failures, name) {
            return Err(failure.error("stop", name));
        }
        self.kill(name);
        Ok(())
    }
}

// =================================== AGENT ====================================== //

pub fn fast_options() -> ReconcilerOptions {
    let backoff = CooldownOptions {
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
    };
    ReconcilerOptions {
        fetch_attempts: 2,
        fetch_backoff: backoff.clone(),
        executor: ExecutorOptions {
            max_parallel: 4,
            max_attempts: 3,
            retry_backoff: backoff,
            pull_timeout: Duration::from_secs(5),
        },
    }
}

/// A reconciler wired to fakes, storing its files in a temporary directory
pub struct Agent {
    pub state: AppState,
    pub channel: Arc<FakeChannel>,
    pub runtime: Arc<FakeRuntime>,
    pub dir: TempDir,
}

impl Agent {
    pub async fn new() -> Self {
        Self::with_runtime(FakeRuntime::default()).await
    }

    pub async fn with_runtime(runtime: FakeRuntime) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, Arc::new(FakeChannel::default()), Arc::new(runtime)).await
    }

    /// Start an agent over an existing directory, as after a restart
    pub async fn in_dir(dir: TempDir, channel: Arc<FakeChannel>, runtime: Arc<FakeRuntime>) -> Self {
        let options = AppOptions {
            storage: StorageOptions {
                layout: StorageLayout::new(dir.path()),
                outbox_capacity: 10,
            },
            reconciler: fast_options(),
            ..Default::default()
        };
        let mut device = Device::new(DEVICE, "device-token");
        device.tenant_id = Some(TENANT.to_string());

        let state = AppState::from_parts(device, channel.clone(), runtime.clone(), &options).await;
        Self {
            state,
            channel,
            runtime,
            dir,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.state.reconciler
    }

    /// Run a cycle that is expected to complete
    pub async fn cycle(&self) -> CycleSummary {
        match self.reconciler().run_cycle().await.unwrap() {
            CycleResult::Completed(summary) => summary,
            CycleResult::Cancelled { cycle_id } => panic!("cycle {} was cancelled", cycle_id),
        }
    }
}
