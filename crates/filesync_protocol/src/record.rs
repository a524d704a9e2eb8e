//! Directory listing entries.

use crate::Timestamp;
use chrono::SubsecRound;
use serde::{Deserialize, Serialize};

/// One entry of a point-in-time directory listing.
///
/// `path` is relative to the synchronized root, `/`-separated, and unique
/// within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative path of the entry.
    #[serde(alias = "fileName")]
    pub path: String,
    /// Last modification time (UTC).
    #[serde(alias = "lastWriteTimeUtc")]
    pub last_modified: Timestamp,
    /// Whether the entry is a directory.
    #[serde(default)]
    pub is_directory: bool,
}

impl FileRecord {
    /// Creates a record for a regular file.
    pub fn file(path: impl Into<String>, last_modified: Timestamp) -> Self {
        Self {
            path: path.into(),
            last_modified: truncate_timestamp(last_modified),
            is_directory: false,
        }
    }

    /// Creates a record for a directory.
    pub fn directory(path: impl Into<String>, last_modified: Timestamp) -> Self {
        Self {
            path: path.into(),
            last_modified: truncate_timestamp(last_modified),
            is_directory: true,
        }
    }
}

/// Truncates a timestamp to millisecond precision.
///
/// Both sides compare modification times at this precision so that
/// filesystems storing finer or coarser sub-second parts still agree.
pub fn truncate_timestamp(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(3)
}
