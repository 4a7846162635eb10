//! stackup Library
//!
//! Core modules for the platform launcher: host checks, cluster and release
//! provisioning, readiness tracking and the adaptive reverse proxy.

pub mod app;
pub mod cli;
pub mod cluster;
pub mod deploy;
pub mod errors;
pub mod exec;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod preflight;
pub mod prompt;
pub mod proxy;
pub mod readiness;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workload;
