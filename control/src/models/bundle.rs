//! Bundle version model

use chrono::{DateTime, Utc};
use openapi_client::models::{BundleDefinition, BundleRef, ContainerSpec};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::ids::{BundleId, TenantId};

/// An immutable, checksummed set of container specifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleVersion {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub version: Version,
    pub containers: Vec<ContainerSpec>,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl BundleVersion {
    /// The part of the version the checksum covers
    pub fn definition(&self) -> BundleDefinition {
        BundleDefinition {
            bundle_id: self.bundle_id.to_string(),
            version: self.version.to_string(),
            containers: self.containers.clone(),
        }
    }

    /// Recompute the checksum from the stored definition and compare
    pub fn verify_checksum(&self) -> bool {
        self.definition().matches_checksum(&self.checksum)
    }

    pub fn bundle_ref(&self) -> BundleRef {
        BundleRef {
            tenant_id: self.tenant_id.to_string(),
            bundle_id: self.bundle_id.to_string(),
            version: self.version.to_string(),
            checksum: self.checksum.clone(),
        }
    }

    pub fn key(&self) -> BundleKey {
        BundleKey {
            tenant_id: self.tenant_id.clone(),
            bundle_id: self.bundle_id.clone(),
            version: self.version.clone(),
        }
    }
}

/// Lookup key of a bundle version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleKey {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub version: Version,
}

impl std::fmt::Display for BundleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.tenant_id, self.bundle_id, self.version)
    }
}
