//! # Filesync Server
//!
//! Reference server for filesync.
//!
//! This crate provides:
//! - Request handling for the list, create, update, delete, rename and
//!   content endpoints
//! - A push feed notifying every connected client of each change
//! - Bearer token authentication (HS256 JSON Web Tokens)
//! - Directory-backed and in-memory file stores
//!
//! # Architecture
//!
//! The server is transport-agnostic. [`FileSyncServer::handle`] takes a
//! method, path, bearer token and body and returns a status and body; an
//! HTTP binding only has to forward requests and stream the receivers
//! returned by [`FileSyncServer::subscribe`].
//!
//! # Notifications
//!
//! Every successful mutation emits one [`filesync_protocol::ChangeEvent`]
//! without content; clients fetch content through the content endpoint.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod feed;
mod handler;
mod server;
mod store;

pub use auth::{AuthConfig, Claims, TokenService};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use feed::EventFeed;
pub use handler::{HandlerContext, RequestHandler, Response};
pub use server::FileSyncServer;
pub use store::{DirectoryStore, FileStore, MemoryStore};
