//! Fleet control plane
//!
//! Registers bundle versions, stages them across a device fleet in phased
//! rollouts and serves each device its desired state.

pub mod app;
pub mod desired;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod fleet;
pub mod ids;
pub mod logs;
pub mod models;
pub mod registry;
pub mod reports;
pub mod rollout;
pub mod server;
pub mod storage;
pub mod tracker;
pub mod utils;
pub mod workers;
