//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::file::File;

/// Where the agent keeps its files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Device identity written at provisioning time
    pub fn device_file(&self) -> File {
        File::new(self.base_dir.join("device.json"))
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Last desired state fetched from the cloud
    pub fn desired_state_file(&self) -> File {
        File::new(self.base_dir.join("cache").join("desired_state.json"))
    }

    /// Outcome reports waiting for delivery
    pub fn outbox_file(&self) -> File {
        File::new(self.base_dir.join("outbox").join("outcomes.json"))
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/etc/fleet-agent")
    }
}
