//! Settings file management

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ControlError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::rollout::orchestrator::{ConflictPolicy, RollbackScope};

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub server: ServerSettings,

    /// JSON file listing the fleet's devices and tags
    #[serde(default = "default_fleet_file")]
    pub fleet_file: String,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    #[serde(default)]
    pub rollback_scope: RollbackScope,

    /// Assignments without progress for this long are reported as stale
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Enable the rollout sweeper worker
    #[serde(default = "default_true")]
    pub enable_sweeper: bool,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Fallback interval of the event dispatcher when no append wakes it
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: u64,

    /// Delivered events kept for `GET /rollouts/{id}/events`
    #[serde(default = "default_retained_events")]
    pub retained_events: usize,
}

fn default_true() -> bool {
    true
}

fn default_fleet_file() -> String {
    "/etc/fleet-control/fleet.json".to_string()
}

fn default_stale_after() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_dispatch_interval() -> u64 {
    5
}

fn default_retained_events() -> usize {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            server: ServerSettings::default(),
            fleet_file: default_fleet_file(),
            conflict_policy: ConflictPolicy::default(),
            rollback_scope: RollbackScope::default(),
            stale_after_secs: default_stale_after(),
            enable_sweeper: true,
            sweep_interval_secs: default_sweep_interval(),
            dispatch_interval_secs: default_dispatch_interval(),
            retained_events: default_retained_events(),
        }
    }
}

impl Settings {
    /// Read the settings file, falling back to defaults when it is missing
    pub async fn load(file: &File) -> Result<Self, ControlError> {
        if !file.exists().await {
            warn!(
                "Settings file {} not found, using defaults",
                file.path().display()
            );
            return Ok(Self::default());
        }
        file.read_json().await
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8700
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
