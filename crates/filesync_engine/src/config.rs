//! Configuration for the sync engine.

use crate::reconciler::LocalOnlyChoice;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default quiet period the dispatcher waits before draining a batch.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// What to do with entries that exist locally but not on the server
/// during startup reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalOnlyPolicy {
    /// Ask interactively for each entry.
    #[default]
    Prompt,
    /// Push every local-only entry to the server.
    Push,
    /// Delete every local-only entry locally.
    Delete,
}

impl LocalOnlyPolicy {
    /// Returns the choice applied to every entry, or `None` when each
    /// entry is asked about.
    pub fn fixed_choice(self) -> Option<LocalOnlyChoice> {
        match self {
            LocalOnlyPolicy::Prompt => None,
            LocalOnlyPolicy::Push => Some(LocalOnlyChoice::PushAll),
            LocalOnlyPolicy::Delete => Some(LocalOnlyChoice::DeleteAll),
        }
    }
}

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Local root directory being synchronized.
    pub base_directory: PathBuf,
    /// Quiet period before a batch of local changes is dispatched.
    pub debounce: Duration,
    /// Policy for local-only entries at startup.
    pub local_only_policy: LocalOnlyPolicy,
    /// Poll interval used by worker threads to observe shutdown.
    pub poll_interval: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            debounce: DEFAULT_DEBOUNCE,
            local_only_policy: LocalOnlyPolicy::default(),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Sets the debounce period.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the local-only policy.
    pub fn with_local_only_policy(mut self, policy: LocalOnlyPolicy) -> Self {
        self.local_only_policy = policy;
        self
    }

    /// Sets the worker poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
