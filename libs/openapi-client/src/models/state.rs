//! Desired and current state documents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bundle::{BundleDefinition, BundleRef, ContainerSpec};

/// The rollout assignment a desired state originates from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRef {
    pub rollout_id: String,
    pub phase_number: u32,
}

/// Desired state served to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStateResponse {
    pub device_id: String,

    /// Bumped each time the document changes; doubles as the ETag
    pub generation: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleRef>,

    #[serde(default)]
    pub containers: Vec<ContainerSpec>,

    /// Present while a rollout assignment drives this document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentRef>,
}

impl DesiredStateResponse {
    /// Empty desired state for a device nothing was ever deployed to
    pub fn empty(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            generation: 0,
            bundle: None,
            containers: Vec::new(),
            assignment: None,
        }
    }

    /// Whether the containers match the bundle checksum
    ///
    /// Documents without a bundle carry no containers and are always intact.
    pub fn is_intact(&self) -> bool {
        match &self.bundle {
            None => self.containers.is_empty(),
            Some(bundle) => BundleDefinition {
                bundle_id: bundle.bundle_id.clone(),
                version: bundle.version.clone(),
                containers: self.containers.clone(),
            }
            .matches_checksum(&bundle.checksum),
        }
    }
}

/// A container observed on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningContainer {
    pub name: String,
    pub image: String,

    /// Spec hash label set by the agent when it created the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,

    /// Runtime state (running, exited, ...)
    pub state: String,
}

/// Current state reported by a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStateReport {
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_version: Option<String>,

    #[serde(default)]
    pub running_containers: Vec<RunningContainer>,
}
