//! Bundle version registry
//!
//! Append-only store of checksummed bundle versions. A version, once
//! registered, is never replaced; new content means a new version.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use openapi_client::models::ContainerSpec;
use semver::Version;
use tracing::info;

use crate::errors::ControlError;
use crate::ids::{BundleId, TenantId};
use crate::models::bundle::{BundleKey, BundleVersion};

/// Result of a conditional fetch
#[derive(Debug, Clone)]
pub enum ConditionalFetch {
    /// The caller's checksum is current
    NotModified,
    Modified(Arc<BundleVersion>),
}

type VersionMap = BTreeMap<Version, Arc<BundleVersion>>;

/// In-memory bundle version registry
#[derive(Default)]
pub struct BundleVersionRegistry {
    bundles: RwLock<HashMap<(TenantId, BundleId), VersionMap>>,
}

impl BundleVersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a semantic version string
    pub fn parse_version(raw: &str) -> Result<Version, ControlError> {
        Version::parse(raw.trim()).map_err(|e| {
            ControlError::Validation(format!("malformed semantic version '{}': {}", raw, e))
        })
    }

    /// Validate and store a new bundle version
    pub fn register(
        &self,
        tenant_id: &TenantId,
        bundle_id: &BundleId,
        version: &str,
        containers: Vec<ContainerSpec>,
    ) -> Result<Arc<BundleVersion>, ControlError> {
        if bundle_id.as_str().trim().is_empty() {
            return Err(ControlError::Validation("bundle id is empty".to_string()));
        }
        let version = Self::parse_version(version)?;
        validate_containers(&containers)?;

        let mut bundle = BundleVersion {
            tenant_id: tenant_id.clone(),
            bundle_id: bundle_id.clone(),
            version,
            containers,
            checksum: String::new(),
            created_at: Utc::now(),
        };
        bundle.checksum = bundle.definition().compute_checksum()?;

        let mut bundles = self.bundles.write().unwrap_or_else(|e| e.into_inner());
        let versions = bundles
            .entry((tenant_id.clone(), bundle_id.clone()))
            .or_default();
        if versions.contains_key(&bundle.version) {
            return Err(ControlError::conflict(format!(
                "bundle version {} already exists",
                bundle.key()
            )));
        }

        let bundle = Arc::new(bundle);
        versions.insert(bundle.version.clone(), bundle.clone());
        info!(
            bundle = %bundle.key(),
            checksum = %bundle.checksum,
            containers = bundle.containers.len(),
            "registered bundle version"
        );
        Ok(bundle)
    }

    /// Look up an exact version
    pub fn get(&self, key: &BundleKey) -> Result<Arc<BundleVersion>, ControlError> {
        let bundles = self.bundles.read().unwrap_or_else(|e| e.into_inner());
        bundles
            .get(&(key.tenant_id.clone(), key.bundle_id.clone()))
            .and_then(|versions| versions.get(&key.version))
            .cloned()
            .ok_or_else(|| ControlError::NotFound(format!("bundle version {}", key)))
    }

    /// Fetch a version unless the caller already holds `known_checksum`
    pub fn get_if_changed(
        &self,
        key: &BundleKey,
        known_checksum: Option<&str>,
    ) -> Result<ConditionalFetch, ControlError> {
        let bundle = self.get(key)?;
        if known_checksum == Some(bundle.checksum.as_str()) {
            return Ok(ConditionalFetch::NotModified);
        }
        Ok(ConditionalFetch::Modified(bundle))
    }

    /// Highest registered version of a bundle
    pub fn latest(
        &self,
        tenant_id: &TenantId,
        bundle_id: &BundleId,
    ) -> Result<Arc<BundleVersion>, ControlError> {
        let bundles = self.bundles.read().unwrap_or_else(|e| e.into_inner());
        bundles
            .get(&(tenant_id.clone(), bundle_id.clone()))
            .and_then(|versions| versions.values().next_back())
            .cloned()
            .ok_or_else(|| ControlError::NotFound(format!("bundle {}/{}", tenant_id, bundle_id)))
    }

    /// Highest registered version strictly lower than `version`
    pub fn highest_below(
        &self,
        tenant_id: &TenantId,
        bundle_id: &BundleId,
        version: &Version,
    ) -> Option<Arc<BundleVersion>> {
        let bundles = self.bundles.read().unwrap_or_else(|e| e.into_inner());
        bundles
            .get(&(tenant_id.clone(), bundle_id.clone()))
            .and_then(|versions| versions.range(..version.clone()).next_back())
            .map(|(_, bundle)| bundle.clone())
    }

    /// All versions of a bundle in ascending order
    pub fn versions(&self, tenant_id: &TenantId, bundle_id: &BundleId) -> Vec<Arc<BundleVersion>> {
        let bundles = self.bundles.read().unwrap_or_else(|e| e.into_inner());
        bundles
            .get(&(tenant_id.clone(), bundle_id.clone()))
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn validate_containers(containers: &[ContainerSpec]) -> Result<(), ControlError> {
    if containers.is_empty() {
        return Err(ControlError::Validation(
            "bundle version has no containers".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for container in containers {
        if container.name.trim().is_empty() {
            return Err(ControlError::Validation("container name is empty".to_string()));
        }
        if container.image.trim().is_empty() {
            return Err(ControlError::Validation(format!(
                "container '{}' has no image",
                container.name
            )));
        }
        if !names.insert(container.name.as_str()) {
            return Err(ControlError::Validation(format!(
                "duplicate container name '{}'",
                container.name
            )));
        }
    }
    Ok(())
}
