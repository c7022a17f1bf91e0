//! Bundle registry module

pub mod bundles;
