//! Applies server push notifications to the local tree.
//!
//! Every Created/Updated notification passes a staleness guard: it is only
//! applied when the local entry is missing or strictly older than the
//! notification's timestamp. Since applied entries are stamped with that
//! timestamp, re-delivering the same notification is a no-op, which also
//! absorbs the echo of this client's own commands.

use crate::error::{SyncError, SyncResult};
use crate::local;
use crate::transport::{EventReceiver, SyncTransport};
use filesync_protocol::{ChangeEvent, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of applying one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The local tree was changed.
    Applied,
    /// The notification was stale or had nothing to act on.
    Skipped,
}

/// Callback receiving push stream failures.
pub type ErrorCallback = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Counters kept by the applier worker.
#[derive(Debug, Default)]
pub struct ApplierStats {
    applied: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl ApplierStats {
    /// Notifications that changed the local tree.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Notifications that were stale or had no effect.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Notifications whose application failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Mirrors remote changes into the local root.
pub struct EventApplier<T: SyncTransport> {
    root: PathBuf,
    transport: Arc<T>,
}

impl<T: SyncTransport> EventApplier<T> {
    /// Creates an applier for `root`, fetching missing content through
    /// `transport`.
    pub fn new(root: impl Into<PathBuf>, transport: Arc<T>) -> Self {
        Self {
            root: root.into(),
            transport,
        }
    }

    /// Returns the local root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Applies one notification.
    pub fn apply(&self, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
        match event {
            ChangeEvent::Created {
                path,
                last_modified,
                is_directory,
                content,
            } => {
                if *is_directory {
                    self.apply_directory(path, *last_modified)
                } else {
                    self.apply_file(path, *last_modified, content.as_deref())
                }
            }
            ChangeEvent::Updated {
                path,
                last_modified,
                content,
            } => self.apply_file(path, *last_modified, content.as_deref()),
            ChangeEvent::Deleted { path } => self.apply_delete(path),
            ChangeEvent::Renamed { path, new_path } => self.apply_rename(path, new_path),
        }
    }

    fn is_stale(target: &Path, incoming: Timestamp) -> SyncResult<bool> {
        Ok(local::local_mtime(target)?.is_some_and(|local| local >= incoming))
    }

    fn apply_file(
        &self,
        path: &str,
        last_modified: Timestamp,
        content: Option<&[u8]>,
    ) -> SyncResult<ApplyOutcome> {
        let target = local::resolve(&self.root, path)?;
        if target.is_dir() {
            warn!(path, "file notification for a local directory, skipping");
            return Ok(ApplyOutcome::Skipped);
        }
        if Self::is_stale(&target, last_modified)? {
            debug!(path, "local copy is not older, skipping");
            return Ok(ApplyOutcome::Skipped);
        }

        let fetched;
        let content = match content {
            Some(content) => content,
            None => {
                fetched = self.transport.get_content(path)?;
                &fetched
            }
        };
        local::write_file(&target, content, last_modified)?;
        debug!(path, bytes = content.len(), "applied remote file");
        Ok(ApplyOutcome::Applied)
    }

    fn apply_directory(&self, path: &str, last_modified: Timestamp) -> SyncResult<ApplyOutcome> {
        let target = local::resolve(&self.root, path)?;
        if target.is_dir() {
            return Ok(ApplyOutcome::Skipped);
        }
        local::create_directory(&target, last_modified)?;
        debug!(path, "applied remote directory");
        Ok(ApplyOutcome::Applied)
    }

    fn apply_delete(&self, path: &str) -> SyncResult<ApplyOutcome> {
        let target = local::resolve(&self.root, path)?;
        if local::remove_entry(&target)? {
            debug!(path, "applied remote delete");
            Ok(ApplyOutcome::Applied)
        } else {
            Ok(ApplyOutcome::Skipped)
        }
    }

    fn apply_rename(&self, path: &str, new_path: &str) -> SyncResult<ApplyOutcome> {
        let source = local::resolve(&self.root, path)?;
        let destination = local::resolve(&self.root, new_path)?;
        if std::fs::symlink_metadata(&source).is_err() {
            debug!(path, new_path, "rename source already gone, skipping");
            return Ok(ApplyOutcome::Skipped);
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if source.is_file() {
            local::clear_readonly(&source)?;
        }
        std::fs::rename(&source, &destination)?;
        debug!(path, new_path, "applied remote rename");
        Ok(ApplyOutcome::Applied)
    }
}

impl<T: SyncTransport + 'static> EventApplier<T> {
    /// Spawns the worker consuming a push subscription.
    ///
    /// Notifications are applied one at a time in arrival order. Failures
    /// of individual notifications are logged; stream failures are handed
    /// to `on_error`. The worker exits when the subscription ends or the
    /// handle is shut down.
    pub fn spawn(
        self,
        events: EventReceiver,
        poll_interval: Duration,
        on_error: ErrorCallback,
    ) -> SyncResult<ApplierHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ApplierStats::default());
        let worker_stop = stop.clone();
        let worker_stats = stats.clone();

        let thread = thread::Builder::new()
            .name("filesync-applier".into())
            .spawn(move || {
                self.run(&events, poll_interval, &worker_stop, &worker_stats, &on_error)
            })?;

        Ok(ApplierHandle {
            stop,
            stats,
            thread: Some(thread),
        })
    }

    fn run(
        &self,
        events: &EventReceiver,
        poll_interval: Duration,
        stop: &AtomicBool,
        stats: &ApplierStats,
        on_error: &ErrorCallback,
    ) {
        info!(root = %self.root.display(), "applier started");
        while !stop.load(Ordering::SeqCst) {
            let event = match events.recv_timeout(poll_interval) {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    on_error(&e);
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("push subscription ended");
                    break;
                }
            };

            match self.apply(&event) {
                Ok(ApplyOutcome::Applied) => {
                    stats.applied.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ApplyOutcome::Skipped) => {
                    stats.skipped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(path = event.path(), kind = ?event.kind(), error = %e, "failed to apply remote change");
                }
            }
        }
        info!("applier stopped");
    }
}

/// Handle to a running applier worker.
pub struct ApplierHandle {
    stop: Arc<AtomicBool>,
    stats: Arc<ApplierStats>,
    thread: Option<JoinHandle<()>>,
}

impl ApplierHandle {
    /// Returns the worker's counters.
    pub fn stats(&self) -> &ApplierStats {
        &self.stats
    }

    /// Stops the worker and waits for the notification in progress.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("applier worker panicked");
            }
        }
    }
}

impl Drop for ApplierHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Default error callback: logs the failure.
pub fn log_stream_error() -> ErrorCallback {
    Arc::new(|e: &SyncError| error!(error = %e, "push subscription failure"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, PushChannel};
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::time::Instant;
    use tempfile::tempdir;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn applier(root: &Path) -> (EventApplier<MockTransport>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        (EventApplier::new(root, transport.clone()), transport)
    }

    #[test]
    fn created_with_content_writes_and_stamps() {
        let dir = tempdir().unwrap();
        let (applier, _) = applier(dir.path());

        let event = ChangeEvent::file_created("a/b.txt", ts(1_000), b"hi".to_vec());
        assert_eq!(applier.apply(&event).unwrap(), ApplyOutcome::Applied);

        let path = dir.path().join("a").join("b.txt");
        assert_eq!(fs::read(&path).unwrap(), b"hi");
        assert_eq!(local::local_mtime(&path).unwrap(), Some(ts(1_000)));

        // Redelivery is absorbed by the staleness guard.
        assert_eq!(applier.apply(&event).unwrap(), ApplyOutcome::Skipped);
    }

    #[test]
    fn missing_content_is_fetched() {
        let dir = tempdir().unwrap();
        let (applier, transport) = applier(dir.path());
        transport.seed_file("c.txt", ts(50), b"remote");

        let event = ChangeEvent::Updated {
            path: "c.txt".into(),
            last_modified: ts(50),
            content: None,
        };
        assert_eq!(applier.apply(&event).unwrap(), ApplyOutcome::Applied);
        assert_eq!(fs::read(dir.path().join("c.txt")).unwrap(), b"remote");
    }

    #[test]
    fn stale_update_is_skipped() {
        let dir = tempdir().unwrap();
        let (applier, _) = applier(dir.path());
        let path = dir.path().join("a.txt");
        local::write_file(&path, b"local", ts(200)).unwrap();

        let older = ChangeEvent::updated("a.txt", ts(100), b"old".to_vec());
        let equal = ChangeEvent::updated("a.txt", ts(200), b"same".to_vec());
        assert_eq!(applier.apply(&older).unwrap(), ApplyOutcome::Skipped);
        assert_eq!(applier.apply(&equal).unwrap(), ApplyOutcome::Skipped);
        assert_eq!(fs::read(&path).unwrap(), b"local");

        let newer = ChangeEvent::updated("a.txt", ts(300), b"new".to_vec());
        assert_eq!(applier.apply(&newer).unwrap(), ApplyOutcome::Applied);
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn directory_marker() {
        let dir = tempdir().unwrap();
        let (applier, _) = applier(dir.path());
        let event = ChangeEvent::directory_created("x/y", ts(10));
        assert_eq!(applier.apply(&event).unwrap(), ApplyOutcome::Applied);
        assert!(dir.path().join("x").join("y").is_dir());
        assert_eq!(applier.apply(&event).unwrap(), ApplyOutcome::Skipped);
    }

    #[test]
    fn delete_file_directory_and_missing() {
        let dir = tempdir().unwrap();
        let (applier, _) = applier(dir.path());
        local::write_file(&dir.path().join("d").join("x.txt"), b"x", ts(1)).unwrap();
        local::write_file(&dir.path().join("f.txt"), b"f", ts(1)).unwrap();

        assert_eq!(
            applier.apply(&ChangeEvent::deleted("d")).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            applier.apply(&ChangeEvent::deleted("f.txt")).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            applier.apply(&ChangeEvent::deleted("f.txt")).unwrap(),
            ApplyOutcome::Skipped
        );
        assert!(!dir.path().join("d").exists());
    }

    #[test]
    fn delete_then_recreate_restores_entry() {
        let dir = tempdir().unwrap();
        let (applier, _) = applier(dir.path());
        let path = dir.path().join("notes").join("p.txt");

        let events = [
            ChangeEvent::file_created("notes/p.txt", ts(100), b"old".to_vec()),
            ChangeEvent::deleted("notes/p.txt"),
            ChangeEvent::file_created("notes/p.txt", ts(500), b"new".to_vec()),
        ];
        for event in &events {
            assert_eq!(applier.apply(event).unwrap(), ApplyOutcome::Applied);
        }
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(local::local_mtime(&path).unwrap(), Some(ts(500)));

        // Once deleted, an older recreation is not stale.
        applier.apply(&ChangeEvent::deleted("notes/p.txt")).unwrap();
        let older = ChangeEvent::file_created("notes/p.txt", ts(50), b"older".to_vec());
        assert_eq!(applier.apply(&older).unwrap(), ApplyOutcome::Applied);
        assert_eq!(fs::read(&path).unwrap(), b"older");
    }

    #[test]
    fn rename_moves_to_new_path() {
        let dir = tempdir().unwrap();
        let (applier, _) = applier(dir.path());
        local::write_file(&dir.path().join("a.txt"), b"a", ts(1)).unwrap();

        let event = ChangeEvent::renamed("a.txt", "sub/b.txt");
        assert_eq!(applier.apply(&event).unwrap(), ApplyOutcome::Applied);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(fs::read(dir.path().join("sub").join("b.txt")).unwrap(), b"a");

        assert_eq!(applier.apply(&event).unwrap(), ApplyOutcome::Skipped);
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let dir = tempdir().unwrap();
        let (applier, _) = applier(dir.path());
        let result = applier.apply(&ChangeEvent::deleted("../outside"));
        assert!(matches!(result, Err(SyncError::InvalidPath(_))));
    }

    #[test]
    fn worker_applies_and_reports_stream_errors() {
        let dir = tempdir().unwrap();
        let (applier, transport) = applier(dir.path());
        let events = transport.subscribe().unwrap();

        let errors = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = errors.clone();
        let on_error: ErrorCallback = Arc::new(move |e: &SyncError| sink.lock().push(e.to_string()));

        let mut handle = applier
            .spawn(events, Duration::from_millis(10), on_error)
            .unwrap();

        transport.push_event(ChangeEvent::file_created("w.txt", ts(5), b"w".to_vec()));
        transport.push_error("reset");

        let deadline = Instant::now() + Duration::from_secs(5);
        while (handle.stats().applied() < 1 || errors.lock().is_empty()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(handle.stats().applied(), 1);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(fs::read(dir.path().join("w.txt")).unwrap(), b"w");
    }
}
