//! Adaptive reverse proxy configuration

pub mod control;
pub mod discovery;
pub mod generator;
pub mod render;
pub mod topology;
pub mod watch;
