//! Utility functions

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
    pub git_hash: String,
    pub build_time: String,

    /// Target triple the binary was built for
    pub target: String,
}

/// Build metadata embedded by `build.rs`
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
        target: option_env!("BUILD_TARGET").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

/// Delay before retry number `retry` (zero based), capped at `max_delay`
pub fn calc_exp_backoff(options: &CooldownOptions, retry: u32) -> Duration {
    let exponent = retry.min(MAX_BACKOFF_EXPONENT) as i32;
    let delay = options.base_delay.as_secs_f64() * options.multiplier.max(1.0).powi(exponent);
    if !delay.is_finite() {
        return options.max_delay;
    }
    Duration::from_secs_f64(delay).min(options.max_delay)
}

const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Unique identifier for a reconciliation cycle
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
