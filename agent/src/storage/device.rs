//! Device file management
//!
//! The identity itself is issued by the provisioning service; the agent only
//! reads what was written to the device file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Device identity stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,

    /// Bearer token presented on every channel request
    pub token: String,

    #[serde(default)]
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            tenant_id: None,
            name: None,
            activated_at: Some(Utc::now()),
        }
    }
}

/// Assert that the device has been provisioned
pub async fn assert_activated(device_file: &File) -> Result<Device, AgentError> {
    if !device_file.exists().await {
        return Err(AgentError::DeviceNotActivated(format!(
            "device file {} does not exist",
            device_file.path().display()
        )));
    }

    let device: Device = device_file.read_json().await.map_err(|e| {
        AgentError::DeviceNotActivated(format!("Failed to read device file: {}", e))
    })?;

    if device.id.trim().is_empty() {
        return Err(AgentError::DeviceNotActivated(
            "Device ID is empty".to_string(),
        ));
    }
    if device.token.trim().is_empty() {
        return Err(AgentError::DeviceNotActivated(
            "Device token is empty".to_string(),
        ));
    }

    Ok(device)
}

pub async fn save_device(device_file: &File, device: &Device) -> Result<(), AgentError> {
    device_file.write_json(device).await
}
