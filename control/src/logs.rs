//! Logging configuration

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::ControlError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub log_level: LogLevel,

    /// Emit one JSON object per line
    pub json_format: bool,
}

/// Install the global subscriber
///
/// `RUST_LOG` replaces the configured level. Request spans from the HTTP
/// trace layer are logged at the configured level as well.
pub fn init_logging(options: LogOptions) -> Result<(), ControlError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "{level},tower_http={level}",
            level = options.log_level.as_str()
        ))
        .map_err(|e| ControlError::Config(e.to_string()))
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if options.json_format {
        registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    result.map_err(|e| ControlError::Config(e.to_string()))
}
