//! Serve command implementation.

use crate::config::load_config;
use crate::http_server;
use filesync_server::{FileSyncServer, ServerConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Runs the serve command.
pub fn run(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config: ServerConfig = load_config(dir)?;
    let server = match FileSyncServer::new(&config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!(error = %e, "server failed to start");
            return Err(e.into());
        }
    };
    info!(
        base_path = %config.base_path.display(),
        users = config.users.len(),
        "serving"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(http_server::serve(server, config.bind_addr))?;
    Ok(())
}
