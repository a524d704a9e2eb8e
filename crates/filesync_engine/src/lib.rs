//! # Filesync Engine
//!
//! Bidirectional synchronization of a local directory with a filesync
//! server.
//!
//! This crate provides:
//! - Startup reconciliation (last-writer-wins per file)
//! - Local change capture through a recursive filesystem watcher
//! - Debounced, coalesced dispatch of local changes
//! - Application of server push notifications with a staleness guard
//! - HTTP transport abstraction with bearer tokens and an SSE push channel
//!
//! ## Architecture
//!
//! A session runs in two directions at once:
//! 1. Reconcile both trees once at startup
//! 2. Apply server notifications on the applier worker
//! 3. Watch the local tree and dispatch changes on the dispatcher worker
//!
//! ## Key Invariants
//!
//! - Every wire path is relative to the root and cannot escape it
//! - Timestamps are compared at millisecond precision
//! - A notification never overwrites a local entry that is as new or newer
//! - The watcher callback only enqueues; it never does I/O

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod capture;
mod client;
mod config;
mod dispatcher;
mod error;
mod http;
mod local;
mod reconciler;
mod token;
mod transport;

pub use applier::{
    log_stream_error, ApplierHandle, ApplierStats, ApplyOutcome, ErrorCallback, EventApplier,
};
pub use capture::{translate_event, ChangeCapture, ChangeQueue, FileAction, PendingChange};
pub use client::{RunningSync, SyncClient};
pub use config::{LocalOnlyPolicy, SyncConfig, DEFAULT_DEBOUNCE};
pub use dispatcher::{
    coalesce, ChangeDispatcher, DispatchOutcome, DispatcherHandle, DispatcherStats,
};
pub use error::{SyncError, SyncResult};
pub use http::{
    sse_frame, EventStreamReader, HttpClient, HttpResponse, HttpStream, HttpTransport,
    LoopbackClient, LoopbackServer,
};
pub use local::snapshot;
pub use reconciler::{
    plan, Decision, FixedPolicy, LocalOnlyChoice, LocalOnlyResolver, ReconcileAction,
    ReconcilePlan, ReconcileReport, Reconciler,
};
pub use token::{LoginTokenProvider, StaticToken, TokenProvider};
pub use transport::{EventReceiver, MockTransport, PushChannel, SyncTransport};
