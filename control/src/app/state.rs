//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::desired::computer::DesiredStateComputer;
use crate::errors::ControlError;
use crate::events::dispatcher::EventDispatcher;
use crate::events::log::EventLog;
use crate::events::sinks::TracingSink;
use crate::filesys::file::File;
use crate::fleet::directory::{DeviceDirectory, InMemoryDirectory};
use crate::registry::bundles::BundleVersionRegistry;
use crate::reports::store::DeviceReportStore;
use crate::rollout::orchestrator::RolloutOrchestrator;
use crate::tracker::assignments::DeviceAssignmentTracker;

/// Main application state; every component is built here and handed to
/// its users explicitly
pub struct AppState {
    pub registry: Arc<BundleVersionRegistry>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub tracker: Arc<DeviceAssignmentTracker>,
    pub desired: Arc<DesiredStateComputer>,
    pub events: Arc<EventLog>,
    pub orchestrator: Arc<RolloutOrchestrator>,
    pub reports: Arc<DeviceReportStore>,
    pub dispatcher: Arc<EventDispatcher>,
}

impl AppState {
    /// Initialize application state, loading the fleet file if present
    pub async fn init(options: &AppOptions) -> Result<Self, ControlError> {
        info!("Initializing application state...");

        let fleet_file = File::new(&options.fleet_file);
        let directory = if fleet_file.exists().await {
            let directory = InMemoryDirectory::load(&fleet_file).await?;
            info!(
                devices = directory.len(),
                "Loaded fleet file {}",
                fleet_file.path().display()
            );
            directory
        } else {
            warn!(
                "Fleet file {} not found, starting with an empty fleet",
                fleet_file.path().display()
            );
            InMemoryDirectory::new()
        };

        Ok(Self::with_directory(options, Arc::new(directory)))
    }

    /// Build the state around an existing device directory
    pub fn with_directory(options: &AppOptions, directory: Arc<dyn DeviceDirectory>) -> Self {
        let registry = Arc::new(BundleVersionRegistry::new());
        let tracker = Arc::new(DeviceAssignmentTracker::new());
        let desired = Arc::new(DesiredStateComputer::new(registry.clone()));
        let events = Arc::new(EventLog::new());
        let orchestrator = Arc::new(RolloutOrchestrator::new(
            options.orchestrator.clone(),
            registry.clone(),
            directory.clone(),
            tracker.clone(),
            desired.clone(),
            events.clone(),
        ));
        let dispatcher =
            Arc::new(EventDispatcher::new(events.clone()).subscribe(Arc::new(TracingSink)));

        Self {
            registry,
            directory,
            tracker,
            desired,
            events,
            orchestrator,
            reports: Arc::new(DeviceReportStore::new()),
            dispatcher,
        }
    }
}
