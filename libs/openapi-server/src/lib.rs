//! Operator API models

pub mod models;
