//! Phased rollout orchestration

pub mod fsm;
pub mod orchestrator;
