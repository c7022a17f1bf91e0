//! Fleet control plane - Entry Point

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use fleet_control::app::options::{AppOptions, ServerOptions};
use fleet_control::app::run::run;
use fleet_control::filesys::file::File;
use fleet_control::logs::{init_logging, LogOptions};
use fleet_control::rollout::orchestrator::OrchestratorOptions;
use fleet_control::storage::settings::Settings;
use fleet_control::utils::version_info;
use fleet_control::workers::{dispatcher, sweeper};

use tracing::{error, info};

const DEFAULT_SETTINGS_FILE: &str = "/etc/fleet-control/settings.json";

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

    let settings_path = cli_args
        .get("settings")
        .cloned()
        .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string());
    let settings = match Settings::load(&File::new(&settings_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", settings_path, e);
            return;
        }
    };

    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    let options = AppOptions {
        fleet_file: cli_args
            .get("fleet")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&settings.fleet_file)),
        server: ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        orchestrator: OrchestratorOptions {
            conflict_policy: settings.conflict_policy,
            rollback_scope: settings.rollback_scope,
            stale_after: Duration::from_secs(settings.stale_after_secs),
        },
        enable_sweeper: settings.enable_sweeper,
        sweeper: sweeper::Options {
            interval: Duration::from_secs(settings.sweep_interval_secs),
        },
        dispatcher: dispatcher::Options {
            interval: Duration::from_secs(settings.dispatch_interval_secs),
            retained_events: settings.retained_events,
        },
        ..Default::default()
    };

    info!(version = %version.version, "Running fleet control plane with options: {:?}", options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the control plane: {e}");
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
