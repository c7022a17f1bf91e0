//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::rollout::orchestrator::OrchestratorOptions;
use crate::workers::{dispatcher, sweeper};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,

    /// Fleet file loaded into the device directory at startup
    pub fleet_file: PathBuf,

    pub server: ServerOptions,

    pub orchestrator: OrchestratorOptions,

    /// Enable the rollout sweeper worker
    pub enable_sweeper: bool,

    pub sweeper: sweeper::Options,

    pub dispatcher: dispatcher::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            fleet_file: PathBuf::from("/etc/fleet-control/fleet.json"),
            server: ServerOptions::default(),
            orchestrator: OrchestratorOptions::default(),
            enable_sweeper: true,
            sweeper: sweeper::Options::default(),
            dispatcher: dispatcher::Options::default(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8700,
        }
    }
}
