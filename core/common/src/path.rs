//! Scope-relative path model.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Scope;
use crate::{Error, Result};

/// Path separator for raw path strings.
pub const SEPARATOR: char = '/';

/// A path relative to a scope root, independent of any backend.
///
/// The empty segment list is the scope root. Segments are never empty,
/// never `.`/`..`, and never contain the separator or a reserved character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CloudPath {
    segments: Vec<String>,
}

impl CloudPath {
    /// The scope root.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse and normalize a raw path string.
    ///
    /// A single leading separator is collapsed and a single trailing one
    /// stripped, so `"/a/b/"`, `"a/b"` and `"/a/b"` are the same path.
    /// `""` and `"/"` denote the root.
    ///
    /// # Errors
    /// - `InvalidPath` if a segment is empty (`"a//b"`), is `.` or `..`,
    ///   or contains a reserved character
    pub fn normalize(raw: &str) -> Result<Self> {
        let trimmed = raw.strip_prefix(SEPARATOR).unwrap_or(raw);
        let trimmed = trimmed.strip_suffix(SEPARATOR).unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let segments = trimmed
            .split(SEPARATOR)
            .map(|segment| validate_segment(segment, raw).map(|_| segment.to_string()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }

    /// Build a path from already-split segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            validate_segment(segment, segment)?;
        }
        Ok(Self { segments })
    }

    /// Check if this is the scope root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Get the last segment.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Concatenate two segment sequences.
    pub fn join(&self, child: &CloudPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(child.segments.iter().cloned());
        Self { segments }
    }

    /// Append one validated segment.
    pub fn child(&self, name: &str) -> Result<Self> {
        validate_segment(name, name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// The ancestor made of the first `depth` segments (the whole path when
    /// `depth` exceeds its length).
    pub fn prefix(&self, depth: usize) -> Self {
        let depth = depth.min(self.segments.len());
        Self {
            segments: self.segments[..depth].to_vec(),
        }
    }

    /// The path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Render as `/a/b` (root as `/`).
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            SEPARATOR.to_string()
        } else {
            format!("{}{}", SEPARATOR, self.segments.join("/"))
        }
    }
}

fn validate_segment(segment: &str, raw: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::InvalidPath(format!("Empty path segment in '{}'", raw)));
    }
    if segment == "." || segment == ".." {
        return Err(Error::InvalidPath(format!(
            "Relative segment '{}' in '{}'",
            segment, raw
        )));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| *c == SEPARATOR || *c == '\\' || c.is_control())
    {
        return Err(Error::InvalidPath(format!(
            "Reserved character {:?} in '{}'",
            c, raw
        )));
    }
    Ok(())
}

impl fmt::Display for CloudPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_path())
    }
}

impl TryFrom<String> for CloudPath {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::normalize(&raw)
    }
}

impl From<CloudPath> for String {
    fn from(path: CloudPath) -> Self {
        path.to_string_path()
    }
}

/// Backend-addressable key: the only place a scope and a path are combined.
///
/// Adapters decide how the pair maps onto their namespace (a directory under
/// the synced container, a folder walk from the drive's scope root).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    scope: Scope,
    path: CloudPath,
}

impl StorageKey {
    pub fn new(scope: Scope, path: CloudPath) -> Self {
        Self { scope, path }
    }

    /// Root key of a scope.
    pub fn root(scope: Scope) -> Self {
        Self::new(scope, CloudPath::root())
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn path(&self) -> &CloudPath {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    pub fn name(&self) -> Option<&str> {
        self.path.name()
    }

    /// Key of the parent directory in the same scope.
    pub fn parent(&self) -> Option<Self> {
        self.path.parent().map(|path| Self::new(self.scope, path))
    }

    /// Key of a direct child in the same scope.
    pub fn child(&self, name: &str) -> Result<Self> {
        Ok(Self::new(self.scope, self.path.child(name)?))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.path)
    }
}

/// Combine a scope and a normalized path into a [`StorageKey`].
pub fn to_storage_key(scope: Scope, path: CloudPath) -> StorageKey {
    StorageKey::new(scope, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_root_forms() {
        assert!(CloudPath::normalize("").unwrap().is_root());
        assert!(CloudPath::normalize("/").unwrap().is_root());
        assert_eq!(CloudPath::root().to_string_path(), "/");
    }

    #[test]
    fn test_normalize_strips_separators() {
        let expected = CloudPath::from_segments(["notes", "todo.txt"]).unwrap();
        assert_eq!(CloudPath::normalize("notes/todo.txt").unwrap(), expected);
        assert_eq!(CloudPath::normalize("/notes/todo.txt").unwrap(), expected);
        assert_eq!(CloudPath::normalize("/notes/todo.txt/").unwrap(), expected);
    }

    #[test]
    fn test_empty_parent_prefix() {
        // `"" + "/" + filename` is how callers build root-level paths
        let path = CloudPath::normalize("/test.txt").unwrap();
        assert_eq!(path.segments(), &["test.txt"]);
    }

    #[test]
    fn test_invalid_segments() {
        for raw in ["a//b", "//a", "a/../b", "./a", "a\\b", "a/\u{0}b"] {
            let err = CloudPath::normalize(raw).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::InvalidPath, "{}", raw);
        }
    }

    #[test]
    fn test_join_and_parent() {
        let parent = CloudPath::normalize("projects").unwrap();
        let child = CloudPath::normalize("src/main.rs").unwrap();
        let joined = parent.join(&child);
        assert_eq!(joined.to_string_path(), "/projects/src/main.rs");
        assert_eq!(joined.name(), Some("main.rs"));
        assert_eq!(joined.parent().unwrap().to_string_path(), "/projects/src");
        assert_eq!(CloudPath::root().join(&child), child);
    }

    #[test]
    fn test_prefix() {
        let path = CloudPath::normalize("a/b/c").unwrap();
        assert!(path.prefix(0).is_root());
        assert_eq!(path.prefix(2).to_string_path(), "/a/b");
        assert_eq!(path.prefix(9), path);
    }

    #[test]
    fn test_child_rejects_separator() {
        assert!(CloudPath::root().child("a/b").is_err());
        assert!(CloudPath::root().child("").is_err());
    }

    #[test]
    fn test_storage_key_keeps_scopes_apart() {
        let path = CloudPath::normalize("a.txt").unwrap();
        let docs = to_storage_key(Scope::Documents, path.clone());
        let data = to_storage_key(Scope::AppData, path);
        assert_ne!(docs, data);
        assert_eq!(docs.to_string(), "documents:/a.txt");
        assert_eq!(docs.parent().unwrap(), StorageKey::root(Scope::Documents));
    }

    #[test]
    fn test_serde_uses_string_form() {
        let path = CloudPath::normalize("a/b").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: CloudPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(raw in "[a-zA-Z0-9 ./\\\\_-]{0,24}") {
            if let Ok(once) = CloudPath::normalize(&raw) {
                let twice = CloudPath::normalize(&once.to_string_path()).unwrap();
                prop_assert_eq!(once, twice);
            }
        }

        #[test]
        fn prop_segments_never_contain_separator(raw in "\\PC{0,32}") {
            if let Ok(path) = CloudPath::normalize(&raw) {
                for segment in path.segments() {
                    prop_assert!(!segment.is_empty());
                    prop_assert!(!segment.contains('/'));
                }
            }
        }
    }
}
