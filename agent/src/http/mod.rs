//! Cloud channel over HTTP

pub mod channel;
pub mod client;
