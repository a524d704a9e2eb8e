//! Server configuration.

use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

fn default_expiry_minutes() -> u64 {
    120
}

/// Configuration for the sync server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(alias = "bindAddr", alias = "BindAddr")]
    pub bind_addr: SocketAddr,
    /// Directory holding the synchronized tree.
    #[serde(alias = "basePath", alias = "BasePath")]
    pub base_path: PathBuf,
    /// Secret key for token signing.
    #[serde(alias = "Secret")]
    pub secret: String,
    /// Token lifetime in minutes.
    #[serde(
        default = "default_expiry_minutes",
        alias = "tokenExpiryMinutes",
        alias = "TokenExpiryMinutes"
    )]
    pub token_expiry_minutes: u64,
    /// Accepted credentials. Empty accepts every pair.
    #[serde(default, alias = "Users")]
    pub users: BTreeMap<String, String>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr, base_path: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            bind_addr,
            base_path: base_path.into(),
            secret: secret.into(),
            token_expiry_minutes: default_expiry_minutes(),
            users: BTreeMap::new(),
        }
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry_minutes(mut self, minutes: u64) -> Self {
        self.token_expiry_minutes = minutes;
        self
    }

    /// Adds an accepted user.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Returns the token lifetime.
    pub fn token_expiry(&self) -> Duration {
        Duration::from_secs(self.token_expiry_minutes.saturating_mul(60))
    }

    /// Checks the configuration is usable.
    pub fn validate(&self) -> ServerResult<()> {
        if self.secret.trim().is_empty() {
            return Err(ServerError::Config("secret must not be empty".into()));
        }
        if self.base_path.as_os_str().is_empty() {
            return Err(ServerError::Config("base_path must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 5000)), "data", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.token_expiry_minutes, 120);
        assert!(config.users.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap(), "/srv/sync", "s3cret")
            .with_token_expiry_minutes(5)
            .with_user("alice", "pw");

        assert_eq!(config.token_expiry(), Duration::from_secs(300));
        assert_eq!(config.users.get("alice").map(String::as_str), Some("pw"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults_and_aliases() {
        let json = r#"{"BindAddr":"127.0.0.1:5001","basePath":"files","secret":"k"}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.bind_addr.port(), 5001);
        assert_eq!(config.base_path, PathBuf::from("files"));
        assert_eq!(config.token_expiry_minutes, 120);
    }
}
