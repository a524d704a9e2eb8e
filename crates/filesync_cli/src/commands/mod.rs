//! CLI command implementations.

pub mod init_config;
pub mod serve;
pub mod sync;
