//! Container runtime abstraction

use std::time::Duration;

use async_trait::async_trait;
use openapi_client::models::{ContainerSpec, RunningContainer};

use crate::errors::AgentError;

/// Label marking containers the agent owns; nothing else is ever touched
pub const MANAGED_LABEL: &str = "io.fleet.managed";

/// Label carrying the hash of the spec a container was created from
pub const SPEC_HASH_LABEL: &str = "io.fleet.spec-hash";

/// A container carrying the managed label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub name: String,
    pub image: String,
    pub spec_hash: Option<String>,

    /// Runtime state as reported by the runtime (running, exited, ...)
    pub state: String,
}

impl ManagedContainer {
    pub fn is_running(&self) -> bool {
        matches!(self.state.as_str(), "running" | "restarting")
    }
}

impl From<&ManagedContainer> for RunningContainer {
    fn from(container: &ManagedContainer) -> Self {
        RunningContainer {
            name: container.name.clone(),
            image: container.image.clone(),
            spec_hash: container.spec_hash.clone(),
            state: container.state.clone(),
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Containers carrying the managed label, in any state
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, AgentError>;

    /// Pull an image, giving up after `timeout`
    async fn pull_image(&self, image: &str, timeout: Duration) -> Result<(), AgentError>;

    /// Create and start a container labelled with `spec_hash`
    async fn start_container(&self, spec: &ContainerSpec, spec_hash: &str)
        -> Result<(), AgentError>;

    /// Stop and remove a container; a missing container is not an error
    async fn stop_container(&self, name: &str) -> Result<(), AgentError>;
}
