//! Persistent launcher state

pub mod deployment;
pub mod layout;
pub mod settings;
