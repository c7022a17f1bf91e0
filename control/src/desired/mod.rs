//! Device desired state

pub mod computer;
