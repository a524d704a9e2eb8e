//! Bearer token acquisition.

use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use filesync_protocol::{decode, encode, endpoints, AuthRequest, AuthResponse};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Supplies the bearer token attached to every request.
pub trait TokenProvider: Send + Sync {
    /// Returns a token, acquiring one if needed.
    fn token(&self) -> SyncResult<String>;

    /// Drops the cached token so the next call acquires a fresh one.
    fn invalidate(&self) {}
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> SyncResult<String> {
        Ok(self.0.clone())
    }
}

/// Logs in with username and password and caches the returned token.
pub struct LoginTokenProvider<C: HttpClient> {
    login_url: String,
    client: Arc<C>,
    credentials: AuthRequest,
    cached: RwLock<Option<String>>,
}

impl<C: HttpClient> LoginTokenProvider<C> {
    /// Creates a provider logging in against `base_url`.
    pub fn new(base_url: &str, client: Arc<C>, credentials: AuthRequest) -> Self {
        Self {
            login_url: format!("{}{}", base_url.trim_end_matches('/'), endpoints::AUTH),
            client,
            credentials,
            cached: RwLock::new(None),
        }
    }

    /// Performs a login request regardless of the cache.
    pub fn login(&self) -> SyncResult<String> {
        let body = encode(&self.credentials)?;
        let response = self
            .client
            .post(&self.login_url, body, None)
            .map_err(SyncError::transport_retryable)?;

        match response.status {
            200..=299 => {
                let auth: AuthResponse = decode(&response.body)?;
                info!(user = %self.credentials.username, "logged in");
                Ok(auth.token)
            }
            401 | 403 => Err(SyncError::AccessDenied(format!(
                "login refused for user '{}'",
                self.credentials.username
            ))),
            status => Err(SyncError::ServerError {
                status,
                message: response.text(),
            }),
        }
    }
}

impl<C: HttpClient> TokenProvider for LoginTokenProvider<C> {
    fn token(&self) -> SyncResult<String> {
        if let Some(token) = self.cached.read().clone() {
            return Ok(token);
        }
        let mut cached = self.cached.write();
        if let Some(token) = cached.clone() {
            return Ok(token);
        }
        let token = self.login()?;
        *cached = Some(token.clone());
        Ok(token)
    }

    fn invalidate(&self) {
        debug!("discarding cached token");
        *self.cached.write() = None;
    }
}
