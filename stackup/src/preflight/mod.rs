//! Host validation and tool installation

pub mod checks;
pub mod deps;
