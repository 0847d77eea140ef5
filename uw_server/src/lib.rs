//! HTTP service exposing the user wallet ledger and its checkout gateway.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod shutdown;
