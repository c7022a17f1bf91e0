//! HTTP surface: device channel and operator API

pub mod convert;
pub mod handlers;
pub mod serve;
pub mod state;
