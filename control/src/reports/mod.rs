//! Latest device reports

pub mod store;
