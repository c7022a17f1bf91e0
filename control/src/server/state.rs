//! Server state

use std::sync::Arc;

use crate::desired::computer::DesiredStateComputer;
use crate::events::log::EventLog;
use crate::fleet::directory::DeviceDirectory;
use crate::registry::bundles::BundleVersionRegistry;
use crate::reports::store::DeviceReportStore;
use crate::rollout::orchestrator::RolloutOrchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub registry: Arc<BundleVersionRegistry>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub orchestrator: Arc<RolloutOrchestrator>,
    pub desired: Arc<DesiredStateComputer>,
    pub reports: Arc<DeviceReportStore>,
    pub events: Arc<EventLog>,
}

impl ServerState {
    pub fn new(
        registry: Arc<BundleVersionRegistry>,
        directory: Arc<dyn DeviceDirectory>,
        orchestrator: Arc<RolloutOrchestrator>,
        desired: Arc<DesiredStateComputer>,
        reports: Arc<DeviceReportStore>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            registry,
            directory,
            orchestrator,
            desired,
            reports,
            events,
        }
    }
}
