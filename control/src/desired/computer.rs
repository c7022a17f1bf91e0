//! Desired state computation
//!
//! The desired state of a device is a pure function of its active
//! assignment (if any), its last known good target and the registered
//! bundle versions. Absence of an active assignment never means "remove
//! everything": the device keeps the last target it succeeded on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use openapi_client::models::{AssignmentRef, DesiredStateResponse};
use tracing::debug;

use crate::errors::ControlError;
use crate::ids::{DeviceId, RolloutId};
use crate::models::bundle::{BundleKey, BundleVersion};
use crate::registry::bundles::BundleVersionRegistry;

/// Bundle version an assignment points a device at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub bundle: BundleKey,
    pub rollout_id: RolloutId,
    pub phase_number: u32,
}

/// Content of a desired state document, without its generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredContent {
    pub bundle: Option<Arc<BundleVersion>>,

    /// Set only while an active assignment drives the content
    pub assignment: Option<AssignmentRef>,
}

impl DesiredContent {
    pub fn empty() -> Self {
        Self {
            bundle: None,
            assignment: None,
        }
    }
}

/// Compute the desired content of a device
pub fn compute_desired_state(
    active: Option<&DeploymentTarget>,
    last_known_good: Option<&DeploymentTarget>,
    registry: &BundleVersionRegistry,
) -> Result<DesiredContent, ControlError> {
    if let Some(target) = active {
        return Ok(DesiredContent {
            bundle: Some(registry.get(&target.bundle)?),
            assignment: Some(AssignmentRef {
                rollout_id: target.rollout_id.to_string(),
                phase_number: target.phase_number,
            }),
        });
    }

    match last_known_good {
        Some(target) => Ok(DesiredContent {
            bundle: Some(registry.get(&target.bundle)?),
            assignment: None,
        }),
        None => Ok(DesiredContent::empty()),
    }
}

#[derive(Debug, Clone)]
struct StoredState {
    content: DesiredContent,
    generation: u64,
}

/// Holds the latest desired state per device plus the sticky
/// last-known-good target; the orchestrator is the only writer
pub struct DesiredStateComputer {
    registry: Arc<BundleVersionRegistry>,
    documents: RwLock<HashMap<DeviceId, StoredState>>,
    last_known_good: RwLock<HashMap<DeviceId, DeploymentTarget>>,
}

impl DesiredStateComputer {
    pub fn new(registry: Arc<BundleVersionRegistry>) -> Self {
        Self {
            registry,
            documents: RwLock::new(HashMap::new()),
            last_known_good: RwLock::new(HashMap::new()),
        }
    }

    /// Remember the target a device last succeeded on
    pub fn record_success(&self, device_id: &DeviceId, target: DeploymentTarget) {
        let mut lkg = self
            .last_known_good
            .write()
            .unwrap_or_else(|e| e.into_inner());
        lkg.insert(device_id.clone(), target);
    }

    pub fn last_known_good(&self, device_id: &DeviceId) -> Option<DeploymentTarget> {
        let lkg = self.last_known_good.read().unwrap_or_else(|e| e.into_inner());
        lkg.get(device_id).cloned()
    }

    /// Recompute and store a device's document; returns its generation
    ///
    /// The generation only moves when the content changes, so repeated
    /// recomputation is harmless.
    pub fn recompute(
        &self,
        device_id: &DeviceId,
        active: Option<&DeploymentTarget>,
    ) -> Result<u64, ControlError> {
        let lkg = self.last_known_good(device_id);
        let content = compute_desired_state(active, lkg.as_ref(), &self.registry)?;

        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let generation = match documents.get(device_id) {
            Some(stored) if stored.content == content => return Ok(stored.generation),
            Some(stored) => stored.generation + 1,
            None => 1,
        };
        debug!(
            device = %device_id,
            generation,
            bundle = ?content.bundle.as_ref().map(|b| b.key().to_string()),
            "desired state updated"
        );
        documents.insert(device_id.clone(), StoredState { content, generation });
        Ok(generation)
    }

    /// The document served to the device
    pub fn desired_state(&self, device_id: &DeviceId) -> DesiredStateResponse {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        match documents.get(device_id) {
            None => DesiredStateResponse::empty(device_id.to_string()),
            Some(stored) => DesiredStateResponse {
                device_id: device_id.to_string(),
                generation: stored.generation,
                bundle: stored.content.bundle.as_ref().map(|b| b.bundle_ref()),
                containers: stored
                    .content
                    .bundle
                    .as_ref()
                    .map(|b| b.containers.clone())
                    .unwrap_or_default(),
                assignment: stored.content.assignment.clone(),
            },
        }
    }
}
