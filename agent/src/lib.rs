//! Fleet agent library
//!
//! Core modules of the device-side reconciler.

pub mod app;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
