//! Authentication support for the sync server.
//!
//! Bearer tokens are HS256-signed JSON Web Tokens.
//!
//! ## Token Format
//!
//! `base64url(header) "." base64url(claims) "." base64url(signature)`, where
//! the header is `{"alg":"HS256","typ":"JWT"}`, the claims carry the user
//! name (`sub`), issue time (`iat`) and expiry (`exp`) in Unix seconds, and
//! the signature is HMAC-SHA256 over the first two parts.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use filesync_protocol::{AuthRequest, AuthResponse};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
    /// Accepted credentials. Empty accepts every pair.
    pub users: BTreeMap<String, String>,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(120 * 60),
            users: BTreeMap::new(),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Restricts logins to the given credentials.
    pub fn with_users(mut self, users: BTreeMap<String, String>) -> Self {
        self.users = users;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Claims carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User name.
    pub sub: String,
    /// Issued at, Unix seconds.
    pub iat: u64,
    /// Expires at, Unix seconds.
    pub exp: u64,
}

/// Issues and validates bearer tokens.
#[derive(Clone, Debug)]
pub struct TokenService {
    config: AuthConfig,
}

impl TokenService {
    /// Creates a new token service.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Checks credentials and issues a token.
    pub fn login(&self, request: &AuthRequest) -> ServerResult<AuthResponse> {
        if !self.config.users.is_empty()
            && self.config.users.get(&request.username) != Some(&request.password)
        {
            info!(user = %request.username, "login refused");
            return Err(ServerError::AccessDenied("invalid credentials".into()));
        }
        let token = self.create_token(&request.username)?;
        info!(user = %request.username, "login accepted");
        Ok(AuthResponse { token })
    }

    /// Creates a token for `subject`.
    pub fn create_token(&self, subject: &str) -> ServerResult<String> {
        let iat = now_secs();
        let claims = Claims {
            sub: subject.to_string(),
            iat,
            exp: iat.saturating_add(self.config.token_expiry.as_secs()),
        };
        let claims = serde_json::to_vec(&claims)
            .map_err(|e| ServerError::Internal(format!("failed to encode claims: {}", e)))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let signature = self.mac()?.chain_update(signing_input.as_bytes()).finalize();
        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.into_bytes())
        ))
    }

    /// Validates a token and returns its claims.
    pub fn validate(&self, token: &str) -> ServerResult<Claims> {
        let unauthorized = |reason: &str| ServerError::NotAuthorized(reason.to_string());

        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(unauthorized("Malformed token"));
        };

        let header = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| unauthorized("Malformed token header"))?;
        let header: serde_json::Value =
            serde_json::from_slice(&header).map_err(|_| unauthorized("Malformed token header"))?;
        if header.get("alg").and_then(|a| a.as_str()) != Some("HS256") {
            return Err(unauthorized("Unsupported token algorithm"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| unauthorized("Malformed token signature"))?;
        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        self.mac()?
            .chain_update(signing_input.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| unauthorized("Invalid signature"))?;

        let claims = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| unauthorized("Malformed token claims"))?;
        let claims: Claims =
            serde_json::from_slice(&claims).map_err(|_| unauthorized("Malformed token claims"))?;

        if now_secs() >= claims.exp {
            debug!(user = %claims.sub, "rejected expired token");
            return Err(unauthorized("Token expired"));
        }
        Ok(claims)
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid signing key: {}", e)))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
