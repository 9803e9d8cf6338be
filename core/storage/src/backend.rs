//! Backend capability interface.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use cloudfs_common::{CloudPath, Error, ErrorKind, FileKind, FileStat, Scope, StorageKey};

use crate::fault::{BackendFault, FaultResult};

/// The closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// The platform's ambient synced container.
    NativeSynced,
    /// Remote drive authenticated with a bearer token.
    TokenDrive,
}

impl BackendKind {
    /// Short name used in logs and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::NativeSynced => "native",
            BackendKind::TokenDrive => "drive",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "native_synced" | "icloud" => Ok(BackendKind::NativeSynced),
            "drive" | "token_drive" | "gdrive" | "googledrive" => Ok(BackendKind::TokenDrive),
            other => Err(Error::Unavailable(format!("Unknown backend: {}", other))),
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub kind: FileKind,
}

/// One object found by a reconciliation scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    /// Backend identifier, distinct per underlying object.
    pub id: String,
    /// Logical path the object resolves to.
    pub path: CloudPath,
    pub kind: FileKind,
}

/// Lazy listing; a fresh call re-enumerates.
pub type ChildStream = Pin<Box<dyn Stream<Item = FaultResult<ChildEntry>> + Send>>;

/// Capability set shared by every backend.
///
/// Calls are independent: nothing here locks across calls, so a read racing
/// a write or unlink on the same key may see either state.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// Probe whether the backend is usable right now.
    async fn is_available(&self) -> bool;

    /// Check if a key exists.
    async fn exists(&self, key: &StorageKey) -> FaultResult<bool>;

    /// Inspect a key.
    ///
    /// # Errors
    /// - Not found, including paths below a file
    async fn stat(&self, key: &StorageKey) -> FaultResult<FileStat>;

    /// Create a directory.
    ///
    /// # Preconditions
    /// - Parent directory must exist; ancestors are never created
    ///
    /// # Postconditions
    /// - Succeeds silently if the directory already exists
    ///
    /// # Errors
    /// - A file occupies the key
    /// - Parent not found
    async fn mkdir(&self, key: &StorageKey) -> FaultResult<()>;

    /// Read a whole file.
    ///
    /// # Errors
    /// - File not found
    /// - Key addresses a directory
    async fn read_file(&self, key: &StorageKey) -> FaultResult<Vec<u8>>;

    /// Create or fully overwrite a file.
    ///
    /// # Preconditions
    /// - Parent directory must exist
    ///
    /// # Errors
    /// - Parent not found (the message names the parent)
    /// - Key addresses a directory
    async fn write_file(&self, key: &StorageKey, data: Vec<u8>) -> FaultResult<()>;

    /// Remove a file or an empty directory.
    ///
    /// # Errors
    /// - Not found
    /// - Directory not empty
    /// - Key is a scope root
    async fn unlink(&self, key: &StorageKey) -> FaultResult<()>;

    /// List the direct children of a directory.
    async fn list_children(&self, key: &StorageKey) -> FaultResult<ChildStream>;

    /// Enumerate every object under a scope, for duplicate reconciliation.
    async fn scan(&self, scope: Scope) -> FaultResult<Vec<ScannedEntry>>;

    /// Append to a file, creating it when absent.
    ///
    /// Read-modify-write; not atomic against concurrent writers.
    async fn append_file(&self, key: &StorageKey, data: Vec<u8>) -> FaultResult<()> {
        let mut content = match self.read_file(key).await {
            Ok(content) => content,
            Err(fault) if fault.kind() == ErrorKind::FileNotFound => Vec::new(),
            Err(fault) => return Err(fault),
        };
        content.extend_from_slice(&data);
        self.write_file(key, content).await
    }

    /// Remove a file or a directory with everything below it.
    async fn remove_tree(&self, key: &StorageKey) -> FaultResult<()> {
        if key.is_root() {
            // Let the backend report the root refusal before touching children.
            return self.unlink(key).await;
        }

        if self.stat(key).await?.is_directory() {
            let mut children = self.list_children(key).await?;
            let mut names = Vec::new();
            while let Some(child) = children.next().await {
                names.push(child?.name);
            }
            for name in names {
                let child = key.child(&name).map_err(BackendFault::from)?;
                self.remove_tree(&child).await?;
            }
        }

        self.unlink(key).await
    }
}
