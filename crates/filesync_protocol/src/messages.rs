//! Request/response payloads, endpoint paths and the JSON codec.

use crate::error::ProtocolResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Endpoint paths served by the filesync server.
pub mod endpoints {
    /// Login: `AuthRequest` → `AuthResponse`.
    pub const AUTH: &str = "/api/auth";
    /// List every entry of the tree (GET).
    pub const LIST_PATHS: &str = "/api/filesync/paths";
    /// Create a file or directory marker.
    pub const CREATE: &str = "/api/filesync/create";
    /// Overwrite a file.
    pub const UPDATE: &str = "/api/filesync/update";
    /// Delete a file or directory.
    pub const DELETE: &str = "/api/filesync/delete";
    /// Move a file or directory.
    pub const RENAME: &str = "/api/filesync/rename";
    /// Read a file: `PathQuery` → `FileContent`.
    pub const CONTENT: &str = "/api/filesync/content";
    /// Server-sent event stream of `ChangeEvent` notifications (GET).
    pub const EVENTS: &str = "/api/filesync/events";
}

/// Request method of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read-only request without a body.
    Get,
    /// Request carrying a JSON body.
    Post,
}

impl Method {
    /// Returns the method an endpoint is served with.
    pub fn for_endpoint(path: &str) -> Option<Method> {
        match path {
            endpoints::LIST_PATHS | endpoints::EVENTS => Some(Method::Get),
            endpoints::AUTH
            | endpoints::CREATE
            | endpoints::UPDATE
            | endpoints::DELETE
            | endpoints::RENAME
            | endpoints::CONTENT => Some(Method::Post),
            _ => None,
        }
    }
}

/// Identifies a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathQuery {
    /// Relative path.
    #[serde(alias = "fileName")]
    pub path: String,
}

impl PathQuery {
    /// Creates a new query.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Raw file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// File content.
    #[serde(with = "b64")]
    pub content: Vec<u8>,
}

/// Login credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl AuthRequest {
    /// Creates a new login request.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Opaque bearer token.
    pub token: String,
}

/// Encodes a value as JSON bytes.
pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a value from JSON bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Serde helper carrying bytes as a base64 string.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Same as [`b64`] for optional payloads.
pub(crate) mod b64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}
