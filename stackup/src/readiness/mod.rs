//! Readiness polling

pub mod diagnostics;
pub mod pods;
pub mod policy;
