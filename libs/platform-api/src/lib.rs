//! Platform deployment management API models

pub mod models;

pub use models::*;
