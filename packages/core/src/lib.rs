// Library root: exposes the gateway's modules to the binary and to the
// integration tests in `tests/`.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod rpc;
