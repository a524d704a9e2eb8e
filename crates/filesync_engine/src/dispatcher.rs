//! Debounced dispatch of captured local changes to the server.

use crate::capture::{ChangeQueue, FileAction, PendingChange};
use crate::error::{SyncError, SyncResult};
use crate::local;
use crate::transport::SyncTransport;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of dispatching one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A command was sent.
    Sent,
    /// Nothing needed sending.
    Skipped,
}

/// Counters kept by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    batches: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl DispatcherStats {
    /// Batches drained.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Commands sent.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Changes whose dispatch failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Keeps the last change per path, ordered by each path's first appearance.
///
/// Renames are keyed by their old path.
pub fn coalesce(batch: Vec<PendingChange>) -> Vec<PendingChange> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut ordered: Vec<PendingChange> = Vec::with_capacity(batch.len());
    for change in batch {
        match slots.get(&change.path) {
            Some(&slot) => ordered[slot] = change,
            None => {
                slots.insert(change.path.clone(), ordered.len());
                ordered.push(change);
            }
        }
    }
    ordered
}

/// Turns queued local changes into server commands.
pub struct ChangeDispatcher<T: SyncTransport> {
    root: PathBuf,
    transport: Arc<T>,
    queue: Arc<ChangeQueue>,
    debounce: Duration,
    stats: Arc<DispatcherStats>,
}

impl<T: SyncTransport> ChangeDispatcher<T> {
    /// Creates a dispatcher draining `queue`.
    pub fn new(
        root: impl Into<PathBuf>,
        transport: Arc<T>,
        queue: Arc<ChangeQueue>,
        debounce: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            transport,
            queue,
            debounce,
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    /// Returns the dispatcher's counters.
    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    /// Sends the command for one change.
    ///
    /// The local entry is read at dispatch time, so a burst of writes is
    /// sent once with the final content.
    pub fn dispatch(&self, change: &PendingChange) -> SyncResult<DispatchOutcome> {
        let path = change.path.as_str();
        let target = local::resolve(&self.root, path)?;
        match change.action {
            FileAction::Create => {
                if target.is_dir() {
                    let mtime = local::modified_time(&std::fs::metadata(&target)?)?;
                    self.transport.create(path, mtime, true, None)?;
                } else if target.is_file() {
                    let (content, mtime) = local::read_file(&target)?;
                    self.transport.create(path, mtime, false, Some(&content))?;
                } else {
                    debug!(path, "created entry already gone, skipping");
                    return Ok(DispatchOutcome::Skipped);
                }
            }
            FileAction::Change => {
                if target.is_dir() {
                    return Ok(DispatchOutcome::Skipped);
                }
                let (content, mtime) = match local::read_file(&target) {
                    Ok(read) => read,
                    Err(e) if e.is_not_found() => {
                        debug!(path, "changed entry already gone, skipping");
                        return Ok(DispatchOutcome::Skipped);
                    }
                    Err(e) => return Err(e),
                };
                self.transport.update(path, mtime, &content)?;
            }
            FileAction::Delete => self.transport.delete(path)?,
            FileAction::Rename => {
                let new_path = change.new_path.as_deref().ok_or_else(|| {
                    SyncError::InvalidPath(format!("rename of '{}' without destination", path))
                })?;
                self.transport.rename(path, new_path)?;
            }
        }
        debug!(path, action = ?change.action, "dispatched local change");
        Ok(DispatchOutcome::Sent)
    }

    /// Waits for changes, lets the burst settle, then dispatches it.
    ///
    /// Returns false once the queue is cancelled.
    pub fn run_cycle(&self) -> bool {
        if !self.queue.wait_non_empty() {
            return false;
        }
        if !self.queue.quiet_period(self.debounce) {
            return false;
        }

        let batch = coalesce(self.queue.drain());
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        debug!(changes = batch.len(), "dispatching batch");

        for change in &batch {
            match self.dispatch(change) {
                Ok(DispatchOutcome::Sent) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(DispatchOutcome::Skipped) => {}
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    if e.is_retryable() {
                        warn!(path = %change.path, action = ?change.action, error = %e, "failed to dispatch local change");
                    } else {
                        error!(path = %change.path, action = ?change.action, error = %e, "failed to dispatch local change");
                    }
                }
            }
        }
        true
    }
}

impl<T: SyncTransport + 'static> ChangeDispatcher<T> {
    /// Spawns the dispatcher worker.
    pub fn spawn(self) -> SyncResult<DispatcherHandle> {
        let queue = self.queue.clone();
        let stats = self.stats.clone();
        let thread = thread::Builder::new()
            .name("filesync-dispatcher".into())
            .spawn(move || {
                info!("dispatcher started");
                while self.run_cycle() {}
                info!("dispatcher stopped");
            })?;
        Ok(DispatcherHandle {
            queue,
            stats,
            thread: Some(thread),
        })
    }
}

/// Handle to a running dispatcher worker.
pub struct DispatcherHandle {
    queue: Arc<ChangeQueue>,
    stats: Arc<DispatcherStats>,
    thread: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Returns the dispatcher's counters.
    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    /// Cancels the worker and waits for the batch in progress.
    pub fn shutdown(&mut self) {
        self.queue.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("dispatcher worker panicked");
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use chrono::{TimeZone, Utc};
    use filesync_protocol::{ChangeEvent, EventKind, Timestamp};
    use std::time::Instant;
    use tempfile::tempdir;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn change(action: FileAction, path: &str) -> PendingChange {
        PendingChange::new(action, path)
    }

    #[test]
    fn coalesce_keeps_last_action_in_first_seen_order() {
        let batch = vec![
            change(FileAction::Create, "a"),
            change(FileAction::Change, "b"),
            change(FileAction::Change, "a"),
            change(FileAction::Delete, "c"),
            change(FileAction::Delete, "a"),
        ];
        let merged = coalesce(batch);
        let summary: Vec<(&str, FileAction)> = merged
            .iter()
            .map(|c| (c.path.as_str(), c.action))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", FileAction::Delete),
                ("b", FileAction::Change),
                ("c", FileAction::Delete)
            ]
        );
    }

    #[test]
    fn dispatch_reads_current_state() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let dispatcher = ChangeDispatcher::new(
            dir.path(),
            transport.clone(),
            Arc::new(ChangeQueue::new()),
            Duration::ZERO,
        );
        local::write_file(&dir.path().join("f.txt"), b"v2", ts(77)).unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();

        assert_eq!(
            dispatcher.dispatch(&change(FileAction::Create, "f.txt")).unwrap(),
            DispatchOutcome::Sent
        );
        assert_eq!(
            dispatcher.dispatch(&change(FileAction::Create, "d")).unwrap(),
            DispatchOutcome::Sent
        );
        assert_eq!(
            dispatcher.dispatch(&change(FileAction::Change, "d")).unwrap(),
            DispatchOutcome::Skipped
        );
        assert_eq!(
            dispatcher.dispatch(&change(FileAction::Create, "gone")).unwrap(),
            DispatchOutcome::Skipped
        );
        dispatcher
            .dispatch(&PendingChange::rename("f.txt", "g.txt"))
            .unwrap();
        dispatcher.dispatch(&change(FileAction::Delete, "d")).unwrap();

        let commands = transport.commands();
        assert_eq!(
            commands[0],
            ChangeEvent::file_created("f.txt", ts(77), b"v2".to_vec())
        );
        assert!(matches!(
            commands[1],
            ChangeEvent::Created {
                is_directory: true,
                ..
            }
        ));
        assert_eq!(commands[2], ChangeEvent::renamed("f.txt", "g.txt"));
        assert_eq!(commands[3], ChangeEvent::deleted("d"));
    }

    #[test]
    fn failures_do_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let queue = Arc::new(ChangeQueue::new());
        let dispatcher =
            ChangeDispatcher::new(dir.path(), transport.clone(), queue.clone(), Duration::ZERO);

        queue.push(change(FileAction::Delete, "../escape"));
        queue.push(change(FileAction::Delete, "ok"));
        assert!(dispatcher.run_cycle());

        assert_eq!(dispatcher.stats().failed(), 1);
        assert_eq!(dispatcher.stats().sent(), 1);
        assert_eq!(transport.commands(), vec![ChangeEvent::deleted("ok")]);
    }

    #[test]
    fn burst_is_sent_once_after_quiet_period() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let queue = Arc::new(ChangeQueue::new());
        local::write_file(&dir.path().join("a.txt"), b"final", ts(9)).unwrap();

        let mut handle = ChangeDispatcher::new(
            dir.path(),
            transport.clone(),
            queue.clone(),
            Duration::from_millis(50),
        )
        .spawn()
        .unwrap();

        queue.push(change(FileAction::Create, "a.txt"));
        for _ in 0..5 {
            queue.push(change(FileAction::Change, "a.txt"));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().sent() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        let commands = transport.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind(), EventKind::Updated);
        assert_eq!(handle.stats().batches(), 1);
    }

    #[test]
    fn shutdown_interrupts_idle_wait() {
        let dir = tempdir().unwrap();
        let mut handle = ChangeDispatcher::new(
            dir.path(),
            Arc::new(MockTransport::new()),
            Arc::new(ChangeQueue::new()),
            Duration::from_secs(60),
        )
        .spawn()
        .unwrap();

        let started = Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
