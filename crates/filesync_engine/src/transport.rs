//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use filesync_protocol::{ChangeEvent, FileRecord, Timestamp};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// Receiving end of a push subscription.
///
/// A transport failure on the stream is delivered as an `Err` item; the
/// channel disconnects when the subscription ends.
pub type EventReceiver = Receiver<SyncResult<ChangeEvent>>;

/// Request/response access to the remote tree.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, loopback, mock for testing).
pub trait SyncTransport: Send + Sync {
    /// Lists every remote entry.
    fn list_paths(&self) -> SyncResult<Vec<FileRecord>>;

    /// Creates a file (with content) or a directory marker.
    fn create(
        &self,
        path: &str,
        last_modified: Timestamp,
        is_directory: bool,
        content: Option<&[u8]>,
    ) -> SyncResult<()>;

    /// Overwrites a file.
    fn update(&self, path: &str, last_modified: Timestamp, content: &[u8]) -> SyncResult<()>;

    /// Deletes a file or directory.
    fn delete(&self, path: &str) -> SyncResult<()>;

    /// Moves a file or directory.
    fn rename(&self, path: &str, new_path: &str) -> SyncResult<()>;

    /// Reads a file's content.
    fn get_content(&self, path: &str) -> SyncResult<Vec<u8>>;

}

/// Server-initiated change notifications.
pub trait PushChannel: Send + Sync {
    /// Opens a subscription to the remote change feed.
    fn subscribe(&self) -> SyncResult<EventReceiver>;
}

#[derive(Debug, Clone)]
struct MockEntry {
    record: FileRecord,
    content: Vec<u8>,
}

/// A mock transport for testing.
///
/// Holds an in-memory remote tree, records every command it receives and
/// lets tests inject push notifications.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    entries: Mutex<BTreeMap<String, MockEntry>>,
    commands: Mutex<Vec<ChangeEvent>>,
    subscribers: Mutex<Vec<Sender<SyncResult<ChangeEvent>>>>,
}

impl MockTransport {
    /// Creates a new mock transport with an empty remote tree.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Sets the connected state. A disconnected mock fails every call.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Adds a remote file without recording a command.
    pub fn seed_file(&self, path: &str, last_modified: Timestamp, content: &[u8]) {
        self.entries.lock().insert(
            path.to_string(),
            MockEntry {
                record: FileRecord::file(path, last_modified),
                content: content.to_vec(),
            },
        );
    }

    /// Adds a remote directory without recording a command.
    pub fn seed_directory(&self, path: &str, last_modified: Timestamp) {
        self.entries.lock().insert(
            path.to_string(),
            MockEntry {
                record: FileRecord::directory(path, last_modified),
                content: Vec::new(),
            },
        );
    }

    /// Returns the remote record for a path.
    pub fn record(&self, path: &str) -> Option<FileRecord> {
        self.entries.lock().get(path).map(|e| e.record.clone())
    }

    /// Returns the remote content for a path.
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(path).map(|e| e.content.clone())
    }

    /// Returns every command received so far.
    pub fn commands(&self) -> Vec<ChangeEvent> {
        self.commands.lock().clone()
    }

    /// Delivers a notification to every subscriber.
    pub fn push_event(&self, event: ChangeEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Delivers a stream failure to every subscriber.
    pub fn push_error(&self, message: &str) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(Err(SyncError::transport_retryable(message))).is_ok());
    }

    /// Ends every open subscription.
    pub fn close_subscriptions(&self) {
        self.subscribers.lock().clear();
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    fn record_command(&self, command: ChangeEvent) {
        self.commands.lock().push(command);
    }
}

fn is_within(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl SyncTransport for MockTransport {
    fn list_paths(&self) -> SyncResult<Vec<FileRecord>> {
        self.check_connected()?;
        Ok(self
            .entries
            .lock()
            .values()
            .map(|e| e.record.clone())
            .collect())
    }

    fn create(
        &self,
        path: &str,
        last_modified: Timestamp,
        is_directory: bool,
        content: Option<&[u8]>,
    ) -> SyncResult<()> {
        self.check_connected()?;
        let command = if is_directory {
            self.seed_directory(path, last_modified);
            ChangeEvent::directory_created(path, last_modified)
        } else {
            let content = content.unwrap_or_default();
            self.seed_file(path, last_modified, content);
            ChangeEvent::file_created(path, last_modified, content.to_vec())
        };
        self.record_command(command);
        Ok(())
    }

    fn update(&self, path: &str, last_modified: Timestamp, content: &[u8]) -> SyncResult<()> {
        self.check_connected()?;
        self.seed_file(path, last_modified, content);
        self.record_command(ChangeEvent::updated(path, last_modified, content.to_vec()));
        Ok(())
    }

    fn delete(&self, path: &str) -> SyncResult<()> {
        self.check_connected()?;
        self.entries.lock().retain(|key, _| !is_within(key, path));
        self.record_command(ChangeEvent::deleted(path));
        Ok(())
    }

    fn rename(&self, path: &str, new_path: &str) -> SyncResult<()> {
        self.check_connected()?;
        {
            let mut entries = self.entries.lock();
            let moved: Vec<String> = entries
                .keys()
                .filter(|key| is_within(key, path))
                .cloned()
                .collect();
            for old in moved {
                if let Some(mut entry) = entries.remove(&old) {
                    let renamed = format!("{}{}", new_path, &old[path.len()..]);
                    entry.record.path = renamed.clone();
                    entries.insert(renamed, entry);
                }
            }
        }
        self.record_command(ChangeEvent::renamed(path, new_path));
        Ok(())
    }

    fn get_content(&self, path: &str) -> SyncResult<Vec<u8>> {
        self.check_connected()?;
        self.content(path).ok_or_else(|| SyncError::ServerError {
            status: 404,
            message: format!("'{}' not found", path),
        })
    }
}

impl PushChannel for MockTransport {
    fn subscribe(&self) -> SyncResult<EventReceiver> {
        self.check_connected()?;
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        assert!(matches!(
            transport.list_paths(),
            Err(SyncError::NotConnected)
        ));
        assert!(matches!(transport.subscribe(), Err(SyncError::NotConnected)));
    }

    #[test]
    fn create_records_files_and_directories() {
        let transport = MockTransport::new();
        transport
            .create("a.txt", ts(10), false, Some(b"hi"))
            .unwrap();
        transport.create("docs", ts(11), true, None).unwrap();

        assert_eq!(transport.content("a.txt").unwrap(), b"hi");
        assert!(transport.record("docs").unwrap().is_directory);
        assert_eq!(transport.commands().len(), 2);
    }

    #[test]
    fn delete_and_rename_cover_children() {
        let transport = MockTransport::new();
        transport.seed_directory("d", ts(1));
        transport.seed_file("d/x.txt", ts(1), b"x");
        transport.seed_file("dx.txt", ts(1), b"y");

        transport.rename("d", "e").unwrap();
        assert!(transport.record("d/x.txt").is_none());
        assert_eq!(transport.record("e/x.txt").unwrap().path, "e/x.txt");
        assert!(transport.record("dx.txt").is_some());

        transport.delete("e").unwrap();
        let paths: Vec<String> = transport
            .list_paths()
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["dx.txt".to_string()]);
    }

    #[test]
    fn push_events_reach_subscribers() {
        let transport = MockTransport::new();
        let rx = transport.subscribe().unwrap();

        transport.push_event(ChangeEvent::deleted("a"));
        transport.push_error("stream reset");

        assert_eq!(rx.recv().unwrap().unwrap(), ChangeEvent::deleted("a"));
        assert!(rx.recv().unwrap().is_err());

        transport.close_subscriptions();
        assert!(rx.recv().is_err());
    }

    #[test]
    fn get_content_missing_is_not_found() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.get_content("nope"),
            Err(SyncError::ServerError { status: 404, .. })
        ));
    }
}
