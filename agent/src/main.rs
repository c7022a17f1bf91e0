//! Fleet agent - Entry Point
//!
//! Runs on a device and keeps its containers in line with the desired state
//! the control plane publishes for it.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use fleet_agent::app::options::{AppOptions, ServerOptions, StorageOptions};
use fleet_agent::app::run::run;
use fleet_agent::filesys::file::File;
use fleet_agent::logs::{init_logging, LogOptions};
use fleet_agent::reconcile::cycle::ReconcilerOptions;
use fleet_agent::reconcile::executor::ExecutorOptions;
use fleet_agent::storage::layout::StorageLayout;
use fleet_agent::storage::settings::Settings;
use fleet_agent::utils::{version_info, CooldownOptions};
use fleet_agent::workers::reconciler;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let mut cli_args: HashMap<String, String> = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            cli_args.insert(key.trim_start_matches('-').to_string(), value.to_string());
        } else if arg.starts_with("--") {
            cli_args.insert(arg.trim_start_matches('-').to_string(), "true".to_string());
        }
    }

    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "Unable to read settings file {}: {}",
                settings_file.path().display(),
                e
            );
            std::process::exit(1);
        }
    };

    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    let reconcile = &settings.reconcile;
    let executor_defaults = ExecutorOptions::default();
    let options = AppOptions {
        backend_base_url: settings.backend.base_url.clone(),
        request_timeout: Duration::from_secs(settings.backend.request_timeout_secs),
        storage: StorageOptions {
            layout,
            outbox_capacity: settings.outbox_capacity,
        },
        docker_binary: settings.docker_binary.clone(),
        enable_socket_server: settings.enable_socket_server,
        server: ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        reconciler: ReconcilerOptions {
            fetch_attempts: reconcile.fetch_attempts,
            executor: ExecutorOptions {
                max_parallel: reconcile.max_parallel_actions,
                max_attempts: reconcile.max_attempts,
                retry_backoff: CooldownOptions {
                    base_delay: Duration::from_secs(reconcile.retry_base_delay_secs),
                    ..executor_defaults.retry_backoff
                },
                pull_timeout: Duration::from_secs(reconcile.pull_timeout_secs),
            },
            ..Default::default()
        },
        reconcile_worker: reconciler::Options {
            interval: Duration::from_secs(reconcile.interval_secs),
            run_on_startup: reconcile.run_on_startup,
        },
        ..Default::default()
    };

    info!(version = %version.version, "Running fleet agent with options: {:?}", options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the agent: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
