//! Device channel models

pub mod models;
