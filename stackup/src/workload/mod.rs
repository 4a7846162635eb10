//! Dependent workload deployment

pub mod client;
pub mod readiness;
