//! Application state management

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

use crate::app::options::AppOptions;
use crate::errors::AgentError;
use crate::http::channel::{CloudChannel, HttpChannel};
use crate::http::client::HttpClient;
use crate::reconcile::cache::DesiredStateCache;
use crate::reconcile::cycle::Reconciler;
use crate::reconcile::docker::DockerCli;
use crate::reconcile::outbox::Outbox;
use crate::reconcile::runtime::ContainerRuntime;
use crate::storage::device::{assert_activated, Device};

/// Main application state
pub struct AppState {
    pub device: Device,
    pub reconciler: Arc<Reconciler>,

    /// Wakes the reconciliation worker outside its interval
    pub trigger: Arc<Notify>,
}

impl AppState {
    /// Load the device identity and wire the channel and the docker runtime
    pub async fn init(options: &AppOptions) -> Result<Self, AgentError> {
        let device = assert_activated(&options.storage.layout.device_file()).await?;
        info!(device = %device.id, "Device identity loaded");

        let client = HttpClient::with_device_id(
            &options.backend_base_url,
            options.request_timeout,
            device.id.clone(),
        )?;
        let channel = Arc::new(HttpChannel::new(client, device.clone()));
        let runtime = Arc::new(DockerCli::new(options.docker_binary.clone()));

        Ok(Self::from_parts(device, channel, runtime, options).await)
    }

    /// State around an explicit channel and runtime
    pub async fn from_parts(
        device: Device,
        channel: Arc<dyn CloudChannel>,
        runtime: Arc<dyn ContainerRuntime>,
        options: &AppOptions,
    ) -> Self {
        let layout = &options.storage.layout;
        let cache = Arc::new(DesiredStateCache::load(layout.desired_state_file()).await);
        let outbox = Arc::new(Outbox::load(layout.outbox_file(), options.storage.outbox_capacity).await);

        let reconciler = Arc::new(Reconciler::new(
            channel,
            runtime,
            cache,
            outbox,
            options.reconciler.clone(),
        ));

        Self {
            device,
            reconciler,
            trigger: Arc::new(Notify::new()),
        }
    }
}
