//! Cluster object models

pub mod pod;
pub mod service;
