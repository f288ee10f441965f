//! Virtual path normalization
//!
//! Every path entering a [`crate::Filesystem`] passes through
//! [`normalize_path`] before an adapter sees it, so adapters only ever
//! receive paths contained in their root.

use crate::error::{Result, StorageError};

/// Normalize a caller-supplied virtual path.
///
/// - strips control characters and a leading `./`
/// - drops empty and `.` segments (so leading, trailing and doubled slashes vanish)
/// - collapses `segment/..` pairs
///
/// Fails with [`StorageError::PathEscapesRoot`] when a `..` has no segment
/// left to cancel, i.e. the path climbs above the store root.
/// An empty result means the root itself.
pub fn normalize_path(input: &str) -> Result<String> {
    let cleaned: String = input.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.strip_prefix("./").unwrap_or(&cleaned);

    let mut segments: Vec<&str> = Vec::new();
    for segment in cleaned.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(StorageError::PathEscapesRoot {
                        path: input.to_string(),
                    });
                }
            }
            name => segments.push(name),
        }
    }

    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_collapses_dot_segments() {
        assert_eq!(normalize_path("a/./b").unwrap(), "a/b");
        assert_eq!(normalize_path("./a/b").unwrap(), "a/b");
        assert_eq!(normalize_path("a/b/../c").unwrap(), "a/c");
        assert_eq!(normalize_path("a//b/").unwrap(), "a/b");
        assert_eq!(normalize_path("/a/b").unwrap(), "a/b");
    }

    #[test]
    fn test_rejects_escape() {
        assert!(matches!(
            normalize_path("../secret"),
            Err(StorageError::PathEscapesRoot { .. })
        ));
        assert!(matches!(
            normalize_path("a/../../b"),
            Err(StorageError::PathEscapesRoot { .. })
        ));
        assert!(normalize_path("..").is_err());
    }

    #[test]
    fn test_root_and_edge_names() {
        assert_eq!(normalize_path("").unwrap(), "");
        assert_eq!(normalize_path("/").unwrap(), "");
        assert_eq!(normalize_path("a/..").unwrap(), "");
        // Three dots is an ordinary file name
        assert_eq!(normalize_path("a/...").unwrap(), "a/...");
        assert_eq!(normalize_path("Docs/README.MD").unwrap(), "Docs/README.MD");
    }

    #[test]
    fn test_strips_control_characters() {
        assert_eq!(normalize_path("a\u{0}b/c\n").unwrap(), "ab/c");
        assert_eq!(normalize_path("\t./x").unwrap(), "x");
    }

    proptest! {
        #[test]
        fn normalized_paths_stay_contained(input in "[a-z./]{0,24}") {
            if let Ok(path) = normalize_path(&input) {
                prop_assert!(!path.starts_with('/'));
                prop_assert!(path.split('/').all(|s| s != ".." && s != "."));
            }
        }

        #[test]
        fn normalization_is_idempotent(input in "[a-z]{1,4}(/[a-z.]{1,4}){0,5}") {
            if let Ok(once) = normalize_path(&input) {
                prop_assert_eq!(normalize_path(&once).unwrap(), once);
            }
        }
    }
}
