//! Change events exchanged between client and server.

use crate::messages::b64_opt;
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Kind of a change event, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Entry was created.
    Created,
    /// Entry content changed.
    Updated,
    /// Entry was removed.
    Deleted,
    /// Entry was moved.
    Renamed,
}

/// A single change to the synchronized tree.
///
/// The same shape serves outbound commands (client → server) and inbound
/// notifications (server → every connected client). Commands always carry
/// content for files; notifications may omit it, in which case the receiver
/// fetches it through the get-content endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    /// An entry appeared.
    Created {
        /// Relative path.
        path: String,
        /// Modification time to stamp on the entry.
        last_modified: Timestamp,
        /// Whether the entry is a directory marker.
        #[serde(default)]
        is_directory: bool,
        /// File content, if carried.
        #[serde(
            default,
            with = "b64_opt",
            skip_serializing_if = "Option::is_none"
        )]
        content: Option<Vec<u8>>,
    },
    /// File content changed.
    Updated {
        /// Relative path.
        path: String,
        /// Modification time to stamp on the entry.
        last_modified: Timestamp,
        /// File content, if carried.
        #[serde(
            default,
            with = "b64_opt",
            skip_serializing_if = "Option::is_none"
        )]
        content: Option<Vec<u8>>,
    },
    /// An entry disappeared. Directories are removed recursively.
    Deleted {
        /// Relative path.
        path: String,
    },
    /// An entry moved.
    Renamed {
        /// Old relative path.
        path: String,
        /// New relative path.
        new_path: String,
    },
}

impl ChangeEvent {
    /// Creates a file creation event carrying content.
    pub fn file_created(path: impl Into<String>, last_modified: Timestamp, content: Vec<u8>) -> Self {
        ChangeEvent::Created {
            path: path.into(),
            last_modified,
            is_directory: false,
            content: Some(content),
        }
    }

    /// Creates a directory marker creation event.
    pub fn directory_created(path: impl Into<String>, last_modified: Timestamp) -> Self {
        ChangeEvent::Created {
            path: path.into(),
            last_modified,
            is_directory: true,
            content: None,
        }
    }

    /// Creates an update event carrying content.
    pub fn updated(path: impl Into<String>, last_modified: Timestamp, content: Vec<u8>) -> Self {
        ChangeEvent::Updated {
            path: path.into(),
            last_modified,
            content: Some(content),
        }
    }

    /// Creates a delete event.
    pub fn deleted(path: impl Into<String>) -> Self {
        ChangeEvent::Deleted { path: path.into() }
    }

    /// Creates a rename event.
    pub fn renamed(path: impl Into<String>, new_path: impl Into<String>) -> Self {
        ChangeEvent::Renamed {
            path: path.into(),
            new_path: new_path.into(),
        }
    }

    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Created { .. } => EventKind::Created,
            ChangeEvent::Updated { .. } => EventKind::Updated,
            ChangeEvent::Deleted { .. } => EventKind::Deleted,
            ChangeEvent::Renamed { .. } => EventKind::Renamed,
        }
    }

    /// Returns the (old) path this event refers to.
    pub fn path(&self) -> &str {
        match self {
            ChangeEvent::Created { path, .. }
            | ChangeEvent::Updated { path, .. }
            | ChangeEvent::Deleted { path }
            | ChangeEvent::Renamed { path, .. } => path,
        }
    }

    /// Returns the modification time carried by Created/Updated events.
    pub fn last_modified(&self) -> Option<Timestamp> {
        match self {
            ChangeEvent::Created { last_modified, .. }
            | ChangeEvent::Updated { last_modified, .. } => Some(*last_modified),
            _ => None,
        }
    }

    /// Returns a copy of this event with any content stripped.
    ///
    /// Servers broadcast notifications in this form.
    pub fn without_content(&self) -> Self {
        match self {
            ChangeEvent::Created {
                path,
                last_modified,
                is_directory,
                ..
            } => ChangeEvent::Created {
                path: path.clone(),
                last_modified: *last_modified,
                is_directory: *is_directory,
                content: None,
            },
            ChangeEvent::Updated {
                path,
                last_modified,
                ..
            } => ChangeEvent::Updated {
                path: path.clone(),
                last_modified: *last_modified,
                content: None,
            },
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts() -> Timestamp {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn tagged_json_shape() {
        let event = ChangeEvent::file_created("a.txt", ts(), b"hi".to_vec());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Created");
        assert_eq!(json["path"], "a.txt");
        assert_eq!(json["content"], "aGk=");
        assert_eq!(json["is_directory"], false);
    }

    #[test]
    fn missing_content_decodes_as_none() {
        let json = r#"{"type":"Updated","path":"a.txt","last_modified":"2023-11-14T22:13:20Z"}"#;
        let event: ChangeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ChangeEvent::Updated {
                path: "a.txt".into(),
                last_modified: ts(),
                content: None,
            }
        );
    }

    #[test]
    fn without_content_keeps_metadata() {
        let event = ChangeEvent::updated("a.txt", ts(), vec![1, 2, 3]);
        let stripped = event.without_content();
        assert_eq!(stripped.kind(), EventKind::Updated);
        assert_eq!(stripped.last_modified(), Some(ts()));
        assert!(matches!(stripped, ChangeEvent::Updated { content: None, .. }));

        let rename = ChangeEvent::renamed("a", "b");
        assert_eq!(rename.without_content(), rename);
    }

    #[test]
    fn accessors() {
        assert_eq!(ChangeEvent::deleted("x").path(), "x");
        assert_eq!(ChangeEvent::renamed("x", "y").kind(), EventKind::Renamed);
        assert_eq!(ChangeEvent::deleted("x").last_modified(), None);
    }
}
