//! Configuration files.
//!
//! Each configuration type lives in `<dir>/<Name>.json`. When the file is
//! missing, a `<Name>.json.example` holding example values is written next
//! to where it was expected and loading fails with [`ConfigError::NotFound`].

use filesync_engine::{LocalOnlyPolicy, SyncConfig};
use filesync_server::ServerConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist; an example was written instead.
    #[error("configuration file {path:?} not found, example written to {example:?}")]
    NotFound {
        /// Expected location.
        path: PathBuf,
        /// Location of the example file.
        example: PathBuf,
    },

    /// The file could not be parsed.
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Parser error.
        source: serde_json::Error,
    },

    /// The values are unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A configuration type stored as one JSON file.
pub trait ConfigFile: Serialize + DeserializeOwned {
    /// File stem, also the type's name.
    const NAME: &'static str;

    /// Values written to the example file.
    fn example() -> Self;

    /// Path of the file inside `dir`.
    fn path_in(dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", Self::NAME))
    }

    /// Path of the example file inside `dir`.
    fn example_path_in(dir: &Path) -> PathBuf {
        dir.join(format!("{}.json.example", Self::NAME))
    }
}

/// Loads `T` from `dir`, writing an example file if it is missing.
pub fn load_config<T: ConfigFile>(dir: &Path) -> Result<T, ConfigError> {
    let path = T::path_in(dir);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let example = write_example::<T>(dir)?;
            return Err(ConfigError::NotFound { path, example });
        }
        Err(e) => return Err(e.into()),
    };
    let config = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Writes the example file for `T` into `dir`, creating the directory.
pub fn write_example<T: ConfigFile>(dir: &Path) -> Result<PathBuf, ConfigError> {
    fs::create_dir_all(dir)?;
    let example = T::example_path_in(dir);
    let json = serde_json::to_vec_pretty(&T::example()).map_err(|source| ConfigError::Parse {
        path: example.clone(),
        source,
    })?;
    fs::write(&example, json)?;
    info!(path = %example.display(), "wrote example configuration");
    Ok(example)
}

fn default_debounce_ms() -> u64 {
    250
}

fn default_timeout_secs() -> u64 {
    30
}

/// Settings of the `sync` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:5000`.
    #[serde(alias = "serverUri", alias = "ServerUri")]
    pub server_uri: String,
    /// Login name.
    #[serde(alias = "Username")]
    pub username: String,
    /// Login password.
    #[serde(alias = "Password")]
    pub password: String,
    /// Local directory to keep in sync.
    #[serde(alias = "baseDirectory", alias = "BaseDirectory")]
    pub base_directory: PathBuf,
    /// Quiet period before local changes are sent.
    #[serde(
        default = "default_debounce_ms",
        alias = "debounceMs",
        alias = "DebounceMs"
    )]
    pub debounce_ms: u64,
    /// What to do with local-only files at startup.
    #[serde(default, alias = "localOnlyPolicy", alias = "LocalOnlyPolicy")]
    pub local_only_policy: LocalOnlyPolicy,
    /// Timeout of a single request.
    #[serde(
        default = "default_timeout_secs",
        alias = "requestTimeoutSecs",
        alias = "RequestTimeoutSecs"
    )]
    pub request_timeout_secs: u64,
}

impl ClientConfig {
    /// Checks the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server_uri.starts_with("http://") && !self.server_uri.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "server_uri '{}' is not an http(s) URL",
                self.server_uri
            )));
        }
        if self.base_directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("base_directory must not be empty".into()));
        }
        Ok(())
    }

    /// Returns the request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Builds the engine configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(&self.base_directory)
            .with_debounce(Duration::from_millis(self.debounce_ms))
            .with_local_only_policy(self.local_only_policy)
    }
}

impl ConfigFile for ClientConfig {
    const NAME: &'static str = "ClientConfig";

    fn example() -> Self {
        Self {
            server_uri: "http://localhost:5000".into(),
            username: "user".into(),
            password: "password".into(),
            base_directory: PathBuf::from("sync"),
            debounce_ms: default_debounce_ms(),
            local_only_policy: LocalOnlyPolicy::Prompt,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ConfigFile for ServerConfig {
    const NAME: &'static str = "ServerConfig";

    fn example() -> Self {
        ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 5000)), "data", "change-me")
            .with_user("user", "password")
    }
}
