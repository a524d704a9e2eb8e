//! Local change capture.
//!
//! The watcher callback runs on the notifier's own thread and does nothing
//! but translate the raw event into [`PendingChange`]s and push them onto a
//! [`ChangeQueue`]. All filesystem reads and network work happen later in
//! the dispatcher.

use crate::error::SyncResult;
use crate::local::relative_path;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Kind of a captured local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAction {
    /// Entry appeared.
    Create,
    /// Entry content or metadata changed.
    Change,
    /// Entry disappeared.
    Delete,
    /// Entry moved; `new_path` is set.
    Rename,
}

/// A local change waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// What happened.
    pub action: FileAction,
    /// Relative path (old path for renames).
    pub path: String,
    /// New relative path, for renames.
    pub new_path: Option<String>,
}

impl PendingChange {
    /// Creates a non-rename change.
    pub fn new(action: FileAction, path: impl Into<String>) -> Self {
        Self {
            action,
            path: path.into(),
            new_path: None,
        }
    }

    /// Creates a rename change.
    pub fn rename(path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            action: FileAction::Rename,
            path: path.into(),
            new_path: Some(new_path.into()),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<PendingChange>,
    cancelled: bool,
}

/// Thread-safe FIFO of pending changes with cancellable waits.
///
/// Producers never block on consumers beyond the short critical section of
/// a push.
#[derive(Debug, Default)]
pub struct ChangeQueue {
    state: Mutex<QueueState>,
    signal: Condvar,
}

impl ChangeQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a change and wakes the consumer.
    pub fn push(&self, change: PendingChange) {
        self.state.lock().items.push_back(change);
        self.signal.notify_all();
    }

    /// Returns the number of queued changes.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every current and future wait.
    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.signal.notify_all();
    }

    /// Blocks until the queue is non-empty. Returns false if cancelled.
    pub fn wait_non_empty(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return false;
            }
            if !state.items.is_empty() {
                return true;
            }
            self.signal.wait(&mut state);
        }
    }

    /// Sleeps for `period` unless cancelled first. Returns false if
    /// cancelled.
    pub fn quiet_period(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut state = self.state.lock();
        while !state.cancelled {
            if self.signal.wait_until(&mut state, deadline).timed_out() {
                return !state.cancelled;
            }
        }
        false
    }

    /// Removes and returns every queued change in arrival order.
    pub fn drain(&self) -> Vec<PendingChange> {
        self.state.lock().items.drain(..).collect()
    }
}

/// Translates one watcher event into pending changes under `root`.
///
/// Paths outside the root and the root itself are dropped.
pub fn translate_event(root: &Path, event: &Event) -> Vec<PendingChange> {
    let relative = |path: &PathBuf| relative_path(root, path);
    let each = |action: FileAction| -> Vec<PendingChange> {
        event
            .paths
            .iter()
            .filter_map(relative)
            .map(|path| PendingChange::new(action, path))
            .collect()
    };

    match &event.kind {
        EventKind::Create(_) => each(FileAction::Create),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match (event.paths.first(), event.paths.get(1)) {
                (Some(from), Some(to)) => match (relative(from), relative(to)) {
                    (Some(from), Some(to)) => vec![PendingChange::rename(from, to)],
                    (Some(from), None) => vec![PendingChange::new(FileAction::Delete, from)],
                    (None, Some(to)) => vec![PendingChange::new(FileAction::Create, to)],
                    (None, None) => Vec::new(),
                },
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(FileAction::Delete),
        EventKind::Modify(ModifyKind::Name(_)) => each(FileAction::Create),
        EventKind::Modify(_) => each(FileAction::Change),
        EventKind::Remove(_) => each(FileAction::Delete),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Recursive watcher feeding a [`ChangeQueue`].
pub struct ChangeCapture {
    root: PathBuf,
    watcher: RecommendedWatcher,
}

impl ChangeCapture {
    /// Starts watching `root` recursively.
    pub fn start(root: &Path, queue: Arc<ChangeQueue>) -> SyncResult<Self> {
        let root = root.canonicalize()?;
        let callback_root = root.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for change in translate_event(&callback_root, &event) {
                        queue.push(change);
                    }
                }
                Err(e) => warn!(error = %e, "watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching for local changes");

        Ok(Self { root, watcher })
    }

    /// Returns the canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stops watching. No further changes are queued once this returns.
    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            debug!(error = %e, "unwatch failed");
        }
        info!("stopped watching");
    }
}
