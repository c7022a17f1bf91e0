//! Application configuration options

use std::time::Duration;

use crate::reconcile::cycle::ReconcilerOptions;
use crate::storage::layout::StorageLayout;
use crate::workers::reconciler;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,

    /// Control plane base URL
    pub backend_base_url: String,

    pub request_timeout: Duration,

    pub storage: StorageOptions,

    /// Container runtime CLI
    pub docker_binary: String,

    /// Enable the local HTTP server
    pub enable_socket_server: bool,

    pub server: ServerOptions,

    pub reconciler: ReconcilerOptions,

    pub reconcile_worker: reconciler::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            backend_base_url: "http://localhost:8700".to_string(),
            request_timeout: Duration::from_secs(30),
            storage: StorageOptions::default(),
            docker_binary: "docker".to_string(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            reconciler: ReconcilerOptions::default(),
            reconcile_worker: reconciler::Options::default(),
        }
    }
}

/// Lifecycle options for the agent
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

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub layout: StorageLayout,

    /// Undelivered outcome reports kept before the oldest are dropped
    pub outbox_capacity: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            outbox_capacity: 100,
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
