//! Rollout event log and fan-out

pub mod dispatcher;
pub mod log;
pub mod sinks;
