//! Local persistent storage

pub mod device;
pub mod layout;
pub mod settings;
