//! Deployment module

pub mod fsm;
