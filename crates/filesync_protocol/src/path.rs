//! Relative path handling.
//!
//! Every path on the wire is relative to the synchronized root and uses `/`
//! as separator regardless of the host platform.

use crate::error::{ProtocolError, ProtocolResult};

/// Normalizes a relative path to its canonical wire form.
///
/// Backslashes become `/`, empty and `.` components are dropped. Absolute
/// paths, drive prefixes and `..` components are rejected so a path can
/// never escape the root it is resolved against.
pub fn normalize_relative_path(path: &str) -> ProtocolResult<String> {
    let unified = path.replace('\\', "/");

    if unified.starts_with('/') {
        return Err(ProtocolError::invalid_path(path, "absolute path"));
    }

    let mut components = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(ProtocolError::invalid_path(path, "parent traversal")),
            c if components.is_empty() && c.len() == 2 && c.ends_with(':') => {
                return Err(ProtocolError::invalid_path(path, "drive prefix"));
            }
            c => components.push(c),
        }
    }

    if components.is_empty() {
        return Err(ProtocolError::invalid_path(path, "empty path"));
    }

    Ok(components.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalizes_separators_and_dots() {
        assert_eq!(normalize_relative_path("a\\b\\c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(normalize_relative_path("./a//b/").unwrap(), "a/b");
    }

    #[test]
    fn rejects_escapes() {
        assert!(normalize_relative_path("../x").is_err());
        assert!(normalize_relative_path("a/../../x").is_err());
        assert!(normalize_relative_path("/etc/passwd").is_err());
        assert!(normalize_relative_path("C:\\Windows").is_err());
        assert!(normalize_relative_path("").is_err());
        assert!(normalize_relative_path("./").is_err());
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(parts in proptest::collection::vec("[a-z0-9_.]{1,8}", 1..5)) {
            let raw = parts.join("/");
            if let Ok(once) = normalize_relative_path(&raw) {
                let twice = normalize_relative_path(&once).unwrap();
                prop_assert_eq!(once.clone(), twice);
                prop_assert!(!once.split('/').any(|c| c == ".." || c.is_empty()));
            }
        }
    }
}
