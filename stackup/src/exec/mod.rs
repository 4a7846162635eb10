//! External tooling

pub mod command;
pub mod helm;
pub mod kubectl;
pub mod scripted;
