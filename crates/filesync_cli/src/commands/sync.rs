//! Sync command implementation.

use crate::config::{load_config, ClientConfig};
use crate::http_client::ReqwestClient;
use crate::prompt::TerminalResolver;
use filesync_engine::{HttpTransport, LocalOnlyPolicy, LoginTokenProvider, SyncClient};
use filesync_protocol::AuthRequest;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::error;

/// Runs the sync command until Enter is pressed or stdin closes.
pub fn run(
    dir: &Path,
    policy: Option<LocalOnlyPolicy>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config: ClientConfig = load_config(dir)?;
    config.validate()?;
    let policy = policy.unwrap_or(config.local_only_policy);

    let client = Arc::new(ReqwestClient::new(config.request_timeout())?);
    let tokens = LoginTokenProvider::new(
        &config.server_uri,
        client.clone(),
        AuthRequest::new(&config.username, &config.password),
    );
    let transport = Arc::new(HttpTransport::new(&config.server_uri, client, tokens));
    let session = SyncClient::new(
        config.sync_config().with_local_only_policy(policy),
        transport.clone(),
        transport,
    );

    // The prompt holds the stdin lock; release it before waiting for Enter.
    let started = session.start(&mut TerminalResolver::stdio());
    let running = match started {
        Ok(running) => running,
        Err(e) => {
            error!(error = %e, "sync failed to start");
            return Err(e.into());
        }
    };

    let report = running.reconcile_report();
    println!(
        "Syncing {} with {} ({} pushed, {} pulled, {} deleted). Press Enter to stop.",
        running.root().display(),
        config.server_uri,
        report.pushed,
        report.pulled,
        report.deleted
    );

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    let sent = running.dispatcher().stats().sent();
    let applied = running.applier().stats().applied();
    running.shutdown();
    println!("Stopped: {} changes sent, {} notifications applied.", sent, applied);
    Ok(())
}
