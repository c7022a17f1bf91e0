//! Device directory collaborator
//!
//! Fleet membership and cohort resolution live outside the control plane.
//! The orchestrator only depends on [`DeviceDirectory`]; the in-memory
//! implementation backs tests and single-node deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ControlError;
use crate::filesys::file::File;
use crate::ids::{DeviceId, TenantId};

/// Fleet membership lookups
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Tenant a device belongs to
    async fn tenant_of(&self, device_id: &DeviceId) -> Option<TenantId>;

    /// All devices of a tenant, sorted by id
    async fn devices(&self, tenant_id: &TenantId) -> Vec<DeviceId>;

    /// Whether the device is currently part of the tenant's fleet
    async fn is_member(&self, tenant_id: &TenantId, device_id: &DeviceId) -> bool;

    /// Devices of a tenant matching a tag query, sorted by id
    async fn resolve_cohort(
        &self,
        tenant_id: &TenantId,
        query: &str,
    ) -> Result<Vec<DeviceId>, ControlError>;
}

/// A device entry of the fleet file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Fleet file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetFile {
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

/// In-memory device directory
#[derive(Default)]
pub struct InMemoryDirectory {
    devices: RwLock<HashMap<DeviceId, DeviceRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the directory from a JSON fleet file
    pub async fn load(file: &File) -> Result<Self, ControlError> {
        let fleet: FleetFile = file.read_json().await?;
        let directory = Self::new();
        for record in fleet.devices {
            directory.upsert(record);
        }
        Ok(directory)
    }

    pub fn upsert(&self, record: DeviceRecord) {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        devices.insert(record.id.clone(), record);
    }

    /// Add a device with `key=value` tags
    pub fn add_device(&self, tenant_id: &TenantId, device_id: &DeviceId, tags: &[(&str, &str)]) {
        self.upsert(DeviceRecord {
            id: device_id.clone(),
            tenant_id: tenant_id.clone(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    /// Remove a device from the fleet
    pub fn remove_device(&self, device_id: &DeviceId) -> Option<DeviceRecord> {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        devices.remove(device_id)
    }

    pub fn len(&self) -> usize {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse a conjunctive `key=value,key=value` query
fn parse_query(query: &str) -> Result<Vec<(String, String)>, ControlError> {
    query
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| match term.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(ControlError::Validation(format!(
                "malformed tag query term '{}'",
                term
            ))),
        })
        .collect()
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn tenant_of(&self, device_id: &DeviceId) -> Option<TenantId> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices.get(device_id).map(|d| d.tenant_id.clone())
    }

    async fn devices(&self, tenant_id: &TenantId) -> Vec<DeviceId> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<DeviceId> = devices
            .values()
            .filter(|d| &d.tenant_id == tenant_id)
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids
    }

    async fn is_member(&self, tenant_id: &TenantId, device_id: &DeviceId) -> bool {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices
            .get(device_id)
            .map(|d| &d.tenant_id == tenant_id)
            .unwrap_or(false)
    }

    async fn resolve_cohort(
        &self,
        tenant_id: &TenantId,
        query: &str,
    ) -> Result<Vec<DeviceId>, ControlError> {
        let terms = parse_query(query)?;
        if terms.is_empty() {
            return Err(ControlError::Validation("tag query is empty".to_string()));
        }

        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<DeviceId> = devices
            .values()
            .filter(|d| &d.tenant_id == tenant_id)
            .filter(|d| terms.iter().all(|(k, v)| d.tags.get(k) == Some(v)))
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        debug!(tenant = %tenant_id, query, matched = ids.len(), "resolved cohort");
        Ok(ids)
    }
}
