//! HTTP request handlers

pub mod channel;
pub mod operator;
pub mod system;
