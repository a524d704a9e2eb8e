//! # Filesync Protocol
//!
//! Wire types and JSON codec shared by the filesync client and server.
//!
//! This crate provides:
//! - [`FileRecord`] entries of a directory listing snapshot
//! - [`ChangeEvent`] for outbound commands and inbound notifications
//! - Request/response payloads and endpoint paths
//! - Relative path normalization
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod messages;
mod path;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use event::{ChangeEvent, EventKind};
pub use messages::{
    decode, encode, endpoints, AuthRequest, AuthResponse, FileContent, Method, PathQuery,
};
pub use path::normalize_relative_path;
pub use record::{truncate_timestamp, FileRecord};

/// Timestamps exchanged on the wire.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
