//! Domain models

pub mod assignment;
pub mod bundle;
pub mod rollout;
