//! Common types used throughout CloudFS.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace partition a path resolves under.
///
/// Identical paths in different scopes never alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// User-visible documents.
    Documents,
    /// Application-private data.
    #[serde(alias = "app_data")]
    AppData,
}

impl Scope {
    /// Every scope, in a stable order.
    pub const ALL: [Scope; 2] = [Scope::Documents, Scope::AppData];

    /// Lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Documents => "documents",
            Scope::AppData => "appdata",
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::AppData
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "documents" => Ok(Scope::Documents),
            "appdata" | "app_data" | "app-data" => Ok(Scope::AppData),
            other => Err(crate::Error::InvalidPath(format!("Unknown scope: {}", other))),
        }
    }
}

/// Kind of an inspected object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// Snapshot of a path's state at the time it was inspected.
///
/// Staleness is the caller's concern; nothing invalidates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// File or directory.
    pub kind: FileKind,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Scope the path was resolved in.
    pub scope: Scope,
    /// Backend identifier of the object (drive file ID, container-relative path).
    pub id: String,
}

impl FileStat {
    /// Check if this is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Check if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}
