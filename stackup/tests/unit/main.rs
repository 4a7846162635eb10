//! Integration tests for the launcher

mod common;
mod test_fsm;
mod test_pipeline;
mod test_proxy;
mod test_uninstall;
