//! Device side reconciliation of containers against the desired state

pub mod cache;
pub mod cycle;
pub mod diff;
pub mod docker;
pub mod executor;
pub mod fsm;
pub mod outbox;
pub mod runtime;
