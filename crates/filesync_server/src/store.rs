//! Storage of the synchronized tree on the server side.

use crate::error::{ServerError, ServerResult};
use filesync_protocol::{normalize_relative_path, truncate_timestamp, FileRecord, Timestamp};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// The four primitives the server needs from its storage, plus a listing.
///
/// Every path argument must already be normalized.
pub trait FileStore: Send + Sync {
    /// Lists every entry, sorted by path.
    fn list(&self) -> ServerResult<Vec<FileRecord>>;

    /// Reads a file.
    fn read(&self, path: &str) -> ServerResult<Vec<u8>>;

    /// Writes a file (creating parents) or, when `content` is `None` and
    /// `is_directory` is set, a directory marker. Stamps `last_modified`.
    fn write(
        &self,
        path: &str,
        last_modified: Timestamp,
        is_directory: bool,
        content: Option<&[u8]>,
    ) -> ServerResult<()>;

    /// Removes a file or a directory recursively. Returns false if nothing
    /// was there.
    fn remove(&self, path: &str) -> ServerResult<bool>;

    /// Moves a file or directory.
    fn rename(&self, path: &str, new_path: &str) -> ServerResult<()>;
}

/// Store backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    base: PathBuf,
}

impl DirectoryStore {
    /// Opens (creating if needed) a store rooted at `base`.
    pub fn open(base: impl Into<PathBuf>) -> ServerResult<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Returns the base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, path: &str) -> ServerResult<PathBuf> {
        let normalized = normalize_relative_path(path)?;
        let mut resolved = self.base.clone();
        resolved.extend(normalized.split('/'));
        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rest = path.strip_prefix(&self.base).ok()?;
        let parts: Option<Vec<&str>> = rest
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        parts.filter(|p| !p.is_empty()).map(|p| p.join("/"))
    }

    fn not_found(path: &str) -> ServerError {
        ServerError::NotFound(format!("'{}' does not exist", path))
    }
}

fn stamp(path: &Path, mtime: Timestamp) -> io::Result<()> {
    let handle = if path.is_dir() {
        File::open(path)?
    } else {
        OpenOptions::new().write(true).open(path)?
    };
    handle.set_modified(SystemTime::from(mtime))
}

#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

impl FileStore for DirectoryStore {
    fn list(&self) -> ServerResult<Vec<FileRecord>> {
        let mut records = Vec::new();
        for entry in WalkDir::new(&self.base).min_depth(1) {
            let entry = entry?;
            if entry.file_type().is_symlink() {
                continue;
            }
            let Some(path) = self.relative(entry.path()) else {
                continue;
            };
            let modified = entry.metadata()?.modified()?;
            let mtime = Timestamp::from(modified);
            records.push(if entry.file_type().is_dir() {
                FileRecord::directory(path, mtime)
            } else {
                FileRecord::file(path, mtime)
            });
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    fn read(&self, path: &str) -> ServerResult<Vec<u8>> {
        let target = self.resolve(path)?;
        if target.is_dir() {
            return Err(ServerError::InvalidRequest(format!(
                "'{}' is a directory",
                path
            )));
        }
        match fs::read(&target) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Self::not_found(path)),
            Err(e) => Err(e.into()),
        }
    }

    fn write(
        &self,
        path: &str,
        last_modified: Timestamp,
        is_directory: bool,
        content: Option<&[u8]>,
    ) -> ServerResult<()> {
        let target = self.resolve(path)?;
        match content {
            None if is_directory => fs::create_dir_all(&target)?,
            content => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                if target.is_file() {
                    make_writable(&target)?;
                }
                fs::write(&target, content.unwrap_or_default())?;
            }
        }
        stamp(&target, truncate_timestamp(last_modified))?;
        Ok(())
    }

    fn remove(&self, path: &str) -> ServerResult<bool> {
        let target = self.resolve(path)?;
        let metadata = match fs::symlink_metadata(&target) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(&target)?;
        } else {
            make_writable(&target)?;
            fs::remove_file(&target)?;
        }
        Ok(true)
    }

    fn rename(&self, path: &str, new_path: &str) -> ServerResult<()> {
        let source = self.resolve(path)?;
        let destination = self.resolve(new_path)?;
        if fs::symlink_metadata(&source).is_err() {
            return Err(Self::not_found(path));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &destination)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    record: FileRecord,
    content: Vec<u8>,
}

/// In-memory store, for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_within(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl FileStore for MemoryStore {
    fn list(&self) -> ServerResult<Vec<FileRecord>> {
        Ok(self
            .entries
            .read()
            .values()
            .map(|e| e.record.clone())
            .collect())
    }

    fn read(&self, path: &str) -> ServerResult<Vec<u8>> {
        match self.entries.read().get(path) {
            Some(entry) if entry.record.is_directory => Err(ServerError::InvalidRequest(
                format!("'{}' is a directory", path),
            )),
            Some(entry) => Ok(entry.content.clone()),
            None => Err(ServerError::NotFound(format!("'{}' does not exist", path))),
        }
    }

    fn write(
        &self,
        path: &str,
        last_modified: Timestamp,
        is_directory: bool,
        content: Option<&[u8]>,
    ) -> ServerResult<()> {
        let path = normalize_relative_path(path)?;
        let mut entries = self.entries.write();

        let mut parent = path.as_str();
        while let Some(i) = parent.rfind('/') {
            parent = &parent[..i];
            entries
                .entry(parent.to_string())
                .or_insert_with(|| MemoryEntry {
                    record: FileRecord::directory(parent, last_modified),
                    content: Vec::new(),
                });
        }

        let record = match content {
            None if is_directory => FileRecord::directory(path.as_str(), last_modified),
            _ => FileRecord::file(path.as_str(), last_modified),
        };
        entries.insert(
            path,
            MemoryEntry {
                record,
                content: content.unwrap_or_default().to_vec(),
            },
        );
        Ok(())
    }

    fn remove(&self, path: &str) -> ServerResult<bool> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !is_within(key, path));
        Ok(entries.len() != before)
    }

    fn rename(&self, path: &str, new_path: &str) -> ServerResult<()> {
        let new_path = normalize_relative_path(new_path)?;
        let mut entries = self.entries.write();
        let moved: Vec<String> = entries
            .keys()
            .filter(|key| is_within(key, path))
            .cloned()
            .collect();
        if moved.is_empty() {
            return Err(ServerError::NotFound(format!("'{}' does not exist", path)));
        }
        for old in moved {
            if let Some(mut entry) = entries.remove(&old) {
                let renamed = format!("{}{}", new_path, &old[path.len()..]);
                entry.record.path = renamed.clone();
                entries.insert(renamed, entry);
            }
        }
        Ok(())
    }
}
