//! Device assignment tracking

pub mod assignments;
