//! CLI command implementations

pub mod config;
pub mod log;
pub mod send;
pub mod status;
pub mod watch;
