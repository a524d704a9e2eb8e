//! Local filesystem access for the synchronized root.

use crate::error::{SyncError, SyncResult};
use filesync_protocol::{normalize_relative_path, truncate_timestamp, FileRecord, Timestamp};
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Resolves a wire path against the local root.
pub fn resolve(root: &Path, relative: &str) -> SyncResult<PathBuf> {
    let normalized = normalize_relative_path(relative)?;
    let mut path = root.to_path_buf();
    path.extend(normalized.split('/'));
    Ok(path)
}

/// Converts an absolute path under `root` to its wire form.
///
/// Returns `None` for the root itself and for paths outside it. Pure
/// string manipulation; never touches the filesystem.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Returns the modification time recorded in `metadata`, at wire precision.
pub fn modified_time(metadata: &Metadata) -> SyncResult<Timestamp> {
    let modified = metadata.modified()?;
    Ok(truncate_timestamp(Timestamp::from(modified)))
}

/// Returns the local modification time of an entry, or `None` if it does
/// not exist.
pub fn local_mtime(path: &Path) -> SyncResult<Option<Timestamp>> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => modified_time(&metadata).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Stamps a modification time on a file or directory.
pub fn set_mtime(path: &Path, mtime: Timestamp) -> SyncResult<()> {
    let handle = if path.is_dir() {
        File::open(path)?
    } else {
        OpenOptions::new().write(true).open(path)?
    };
    handle.set_modified(SystemTime::from(mtime))?;
    Ok(())
}

/// Clears the read-only attribute of an entry if set.
#[allow(clippy::permissions_set_readonly_false)]
pub fn clear_readonly(path: &Path) -> SyncResult<()> {
    let metadata = fs::symlink_metadata(path)?;
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Writes a file, creating parent directories, and stamps its mtime.
pub fn write_file(path: &Path, content: &[u8], mtime: Timestamp) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.is_file() {
        clear_readonly(path)?;
    }
    fs::write(path, content)?;
    set_mtime(path, mtime)
}

/// Creates a directory (and parents) and stamps its mtime.
pub fn create_directory(path: &Path, mtime: Timestamp) -> SyncResult<()> {
    fs::create_dir_all(path)?;
    set_mtime(path, mtime)
}

/// Removes a file, or a directory recursively. Returns false if nothing
/// was there.
pub fn remove_entry(path: &Path) -> SyncResult<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        clear_readonly(path)?;
        fs::remove_file(path)?;
    }
    Ok(true)
}

/// Reads a file's content and modification time.
pub fn read_file(path: &Path) -> SyncResult<(Vec<u8>, Timestamp)> {
    let content = fs::read(path)?;
    let mtime = modified_time(&fs::metadata(path)?)?;
    Ok((content, mtime))
}

/// Lists every file and directory under `root`, sorted by path.
///
/// Symbolic links are skipped.
pub fn snapshot(root: &Path) -> SyncResult<Vec<FileRecord>> {
    let mut records = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let Some(path) = relative_path(root, entry.path()) else {
            return Err(SyncError::InvalidPath(entry.path().display().to_string()));
        };
        let mtime = modified_time(&entry.metadata()?)?;
        records.push(if file_type.is_dir() {
            FileRecord::directory(path, mtime)
        } else {
            FileRecord::file(path, mtime)
        });
    }
    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn resolve_rejects_escape() {
        let root = Path::new("/data");
        assert_eq!(
            resolve(root, "a\\b.txt").unwrap(),
            Path::new("/data").join("a").join("b.txt")
        );
        assert!(matches!(
            resolve(root, "../etc"),
            Err(SyncError::InvalidPath(_))
        ));
    }

    #[test]
    fn relative_path_of_children_only() {
        let root = Path::new("/data/root");
        assert_eq!(
            relative_path(root, Path::new("/data/root/a/b.txt")).as_deref(),
            Some("a/b.txt")
        );
        assert_eq!(relative_path(root, root), None);
        assert_eq!(relative_path(root, Path::new("/data/other")), None);
    }

    #[test]
    fn write_then_snapshot() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("docs").join("a.txt"), b"hi", ts(1_000)).unwrap();
        write_file(&root.join("b.txt"), b"yo", ts(2_000)).unwrap();

        let records = snapshot(root).unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "docs", "docs/a.txt"]);
        assert!(records[1].is_directory);
        assert_eq!(records[2].last_modified, ts(1_000));
    }

    #[test]
    fn write_overwrites_readonly_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.txt");
        fs::write(&path, b"old").unwrap();
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions).unwrap();

        write_file(&path, b"new", ts(5)).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn remove_entry_handles_all_kinds() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("d").join("x.txt"), b"x", ts(1)).unwrap();
        write_file(&root.join("f.txt"), b"f", ts(1)).unwrap();

        assert!(remove_entry(&root.join("d")).unwrap());
        assert!(remove_entry(&root.join("f.txt")).unwrap());
        assert!(!remove_entry(&root.join("missing")).unwrap());
        assert!(snapshot(root).unwrap().is_empty());
    }

    #[test]
    fn local_mtime_of_missing_is_none() {
        let dir = tempdir().unwrap();
        assert_eq!(local_mtime(&dir.path().join("nope")).unwrap(), None);
        create_directory(&dir.path().join("d"), ts(42)).unwrap();
        assert_eq!(local_mtime(&dir.path().join("d")).unwrap(), Some(ts(42)));
    }
}
