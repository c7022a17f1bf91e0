//! Bundle and container specification models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::json_sha256;

/// Container restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    /// Value accepted by `docker run --restart`
    pub fn as_docker_arg(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

/// Port protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

impl PortProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
        }
    }
}

/// Host to container port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: PortProtocol,
}

/// Resource limits applied to a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,

    /// CPU limit in millicores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<u32>,
}

/// Volume mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// A single container of a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name, unique within a bundle
    pub name: String,

    /// Image reference (`registry/repo:tag` or digest)
    pub image: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub ports: Vec<PortMapping>,

    #[serde(default)]
    pub resources: ResourceLimits,

    #[serde(default)]
    pub volumes: Vec<VolumeMount>,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Failures of optional containers degrade an outcome to partial
    /// instead of failing it
    #[serde(default)]
    pub optional: bool,
}

impl ContainerSpec {
    /// Create a spec with defaults for everything but name and image
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            resources: ResourceLimits::default(),
            volumes: Vec::new(),
            restart_policy: RestartPolicy::default(),
            optional: false,
        }
    }

    /// Stable hash of the full spec, used to detect changed containers
    pub fn spec_hash(&self) -> Result<String, serde_json::Error> {
        json_sha256(self)
    }
}

/// Reference to an immutable bundle version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRef {
    pub tenant_id: String,
    pub bundle_id: String,
    pub version: String,
    pub checksum: String,
}

/// The checksummed part of a bundle version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDefinition {
    pub bundle_id: String,
    pub version: String,
    pub containers: Vec<ContainerSpec>,
}

impl BundleDefinition {
    /// Checksum over the serialized definition
    pub fn compute_checksum(&self) -> Result<String, serde_json::Error> {
        json_sha256(self)
    }

    /// Check the definition against a recorded checksum
    pub fn matches_checksum(&self, expected: &str) -> bool {
        self.compute_checksum()
            .map(|actual| actual == expected)
            .unwrap_or(false)
    }
}
