//! Cluster provisioning: lifecycle, credentials and the release itself

pub mod credentials;
pub mod lifecycle;
pub mod release;
