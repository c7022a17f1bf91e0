//! Local status and control API

pub mod handlers;
pub mod serve;
pub mod state;
