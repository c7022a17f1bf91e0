//! Fleet membership collaborator

pub mod directory;
