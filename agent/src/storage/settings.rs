//! Settings file management

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub backend: BackendSettings,

    /// Enable the local status server
    #[serde(default = "default_true")]
    pub enable_socket_server: bool,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    /// Container runtime CLI
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Undelivered outcome reports kept before the oldest are dropped
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_outbox_capacity() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            backend: BackendSettings::default(),
            enable_socket_server: true,
            server: ServerSettings::default(),
            reconcile: ReconcileSettings::default(),
            docker_binary: default_docker_binary(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Settings {
    /// Read the settings file, falling back to defaults when it is missing
    pub async fn load(file: &File) -> Result<Self, AgentError> {
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

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8700".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Local status server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Reconciliation loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Run a cycle as soon as the agent starts
    #[serde(default = "default_true")]
    pub run_on_startup: bool,

    /// Container actions running at the same time
    #[serde(default = "default_max_parallel")]
    pub max_parallel_actions: usize,

    /// Attempts per action, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,

    /// Desired state fetch attempts before falling back to the cache
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
}

fn default_interval() -> u64 {
    60
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    2
}

fn default_pull_timeout() -> u64 {
    300
}

fn default_fetch_attempts() -> u32 {
    3
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            run_on_startup: true,
            max_parallel_actions: default_max_parallel(),
            max_attempts: default_max_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
            pull_timeout_secs: default_pull_timeout(),
            fetch_attempts: default_fetch_attempts(),
        }
    }
}
