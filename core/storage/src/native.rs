//! Platform-native synced container backend.
//!
//! The platform keeps a container directory in sync with the user's cloud
//! account; this backend is a pass-through onto that directory. Whether the
//! container is usable (signed-in account, sync enabled) is owned by the
//! environment and reported through the availability signal, not tracked here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use cloudfs_common::{CloudPath, ErrorKind, FileKind, FileStat, Scope, StorageKey};

use crate::backend::{BackendKind, ChildEntry, ChildStream, ScannedEntry, StorageBackend};
use crate::fault::{BackendFault, FaultResult};

/// Directory under the container holding the `Documents` scope.
const DOCUMENTS_DIR: &str = "Documents";
/// Directory under the container holding the `AppData` scope.
const APP_DATA_DIR: &str = "Data";

/// Fault raised by the synced container.
#[derive(Debug, Error)]
pub enum NativeFault {
    /// Underlying filesystem call failed.
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Parent directory does not exist: {0}")]
    ParentMissing(String),

    #[error("A file already exists at {0}")]
    FileExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Scope root cannot be removed: {0}")]
    ScopeRoot(String),

    #[error("Synced container is not available: {0}")]
    ContainerUnavailable(PathBuf),
}

impl NativeFault {
    /// Map onto the canonical taxonomy.
    pub fn canonical_kind(&self) -> ErrorKind {
        match self {
            NativeFault::Io { source, .. } => match source.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => ErrorKind::FileNotFound,
                io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                io::ErrorKind::DirectoryNotEmpty => ErrorKind::DirectoryNotEmpty,
                io::ErrorKind::PermissionDenied => ErrorKind::Unavailable,
                _ => ErrorKind::Unknown,
            },
            NativeFault::NotFound(_) | NativeFault::ParentMissing(_) => ErrorKind::FileNotFound,
            NativeFault::FileExists(_) => ErrorKind::AlreadyExists,
            NativeFault::NotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            NativeFault::ScopeRoot(_) => ErrorKind::InvalidPath,
            NativeFault::ContainerUnavailable(_) => ErrorKind::Unavailable,
            NativeFault::IsDirectory(_) | NativeFault::NotDirectory(_) => ErrorKind::Unknown,
        }
    }
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Synced container backend.
pub struct NativeSyncedBackend {
    container: PathBuf,
}

impl NativeSyncedBackend {
    /// Create a backend over the given container directory.
    ///
    /// The container itself is not created; scope roots inside it are
    /// created on first use.
    pub fn new(container: impl AsRef<Path>) -> Self {
        Self {
            container: container.as_ref().to_path_buf(),
        }
    }

    /// The container directory.
    pub fn container(&self) -> &Path {
        &self.container
    }

    fn scope_dir(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::Documents => self.container.join(DOCUMENTS_DIR),
            Scope::AppData => self.container.join(APP_DATA_DIR),
        }
    }

    /// Resolve the scope root, creating it inside an existing container.
    async fn scope_root(&self, scope: Scope) -> Result<PathBuf, NativeFault> {
        match fs::metadata(&self.container).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(NativeFault::ContainerUnavailable(self.container.clone())),
        }

        let root = self.scope_dir(scope);
        fs::create_dir_all(&root).await.map_err(|source| NativeFault::Io {
            op: "create scope root",
            path: root.clone(),
            source,
        })?;
        Ok(root)
    }

    /// Convert a key to a filesystem path.
    async fn to_fs_path(&self, key: &StorageKey) -> Result<PathBuf, NativeFault> {
        let mut fs_path = self.scope_root(key.scope()).await?;
        for segment in key.path().segments() {
            fs_path.push(segment);
        }
        Ok(fs_path)
    }

    /// Container-relative identifier of a key.
    fn object_id(&self, scope: Scope, path: &CloudPath) -> String {
        let dir = match scope {
            Scope::Documents => DOCUMENTS_DIR,
            Scope::AppData => APP_DATA_DIR,
        };
        if path.is_root() {
            dir.to_string()
        } else {
            format!("{}/{}", dir, path.segments().join("/"))
        }
    }

    /// Metadata of a key, with missing paths reported as `NotFound`.
    async fn metadata(&self, key: &StorageKey) -> Result<(PathBuf, std::fs::Metadata), NativeFault> {
        let fs_path = self.to_fs_path(key).await?;
        match fs::metadata(&fs_path).await {
            Ok(meta) => Ok((fs_path, meta)),
            Err(err) if is_missing(&err) => Err(NativeFault::NotFound(key.to_string())),
            Err(source) => Err(NativeFault::Io {
                op: "stat",
                path: fs_path,
                source,
            }),
        }
    }

    /// Require the parent of a key to be an existing directory.
    async fn require_parent(&self, key: &StorageKey) -> Result<(), NativeFault> {
        let Some(parent) = key.parent() else {
            return Ok(());
        };
        match self.metadata(&parent).await {
            Ok((_, meta)) if meta.is_dir() => Ok(()),
            Ok(_) | Err(NativeFault::NotFound(_)) => {
                Err(NativeFault::ParentMissing(parent.to_string()))
            }
            Err(fault) => Err(fault),
        }
    }

    fn create_stat(&self, key: &StorageKey, meta: &std::fs::Metadata) -> FileStat {
        let modified: DateTime<Utc> = meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        FileStat {
            kind: if meta.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            },
            size: if meta.is_file() { Some(meta.len()) } else { None },
            modified,
            scope: key.scope(),
            id: self.object_id(key.scope(), key.path()),
        }
    }
}

#[async_trait]
impl StorageBackend for NativeSyncedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativeSynced
    }

    async fn is_available(&self) -> bool {
        fs::metadata(&self.container)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn exists(&self, key: &StorageKey) -> FaultResult<bool> {
        match self.metadata(key).await {
            Ok(_) => Ok(true),
            Err(NativeFault::NotFound(_)) => Ok(false),
            Err(fault) => Err(fault.into()),
        }
    }

    async fn stat(&self, key: &StorageKey) -> FaultResult<FileStat> {
        let (_, meta) = self.metadata(key).await?;
        Ok(self.create_stat(key, &meta))
    }

    async fn mkdir(&self, key: &StorageKey) -> FaultResult<()> {
        match self.metadata(key).await {
            Ok((_, meta)) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(NativeFault::FileExists(key.to_string()).into()),
            Err(NativeFault::NotFound(_)) => {}
            Err(fault) => return Err(fault.into()),
        }

        self.require_parent(key).await?;

        let fs_path = self.to_fs_path(key).await?;
        match fs::create_dir(&fs_path).await {
            Ok(()) => Ok(()),
            // Lost a race with another creator; fine if it made a directory.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                match fs::metadata(&fs_path).await {
                    Ok(meta) if meta.is_dir() => Ok(()),
                    _ => Err(NativeFault::FileExists(key.to_string()).into()),
                }
            }
            Err(source) => Err(NativeFault::Io {
                op: "mkdir",
                path: fs_path,
                source,
            }
            .into()),
        }
    }

    async fn read_file(&self, key: &StorageKey) -> FaultResult<Vec<u8>> {
        let (fs_path, meta) = self.metadata(key).await?;
        if meta.is_dir() {
            return Err(NativeFault::IsDirectory(key.to_string()).into());
        }

        fs::read(&fs_path).await.map_err(|source| {
            if is_missing(&source) {
                NativeFault::NotFound(key.to_string()).into()
            } else {
                NativeFault::Io {
                    op: "read",
                    path: fs_path,
                    source,
                }
                .into()
            }
        })
    }

    async fn write_file(&self, key: &StorageKey, data: Vec<u8>) -> FaultResult<()> {
        if key.is_root() {
            return Err(NativeFault::IsDirectory(key.to_string()).into());
        }
        self.require_parent(key).await?;

        let fs_path = self.to_fs_path(key).await?;
        if fs::metadata(&fs_path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(NativeFault::IsDirectory(key.to_string()).into());
        }

        fs::write(&fs_path, &data).await.map_err(|source| {
            NativeFault::Io {
                op: "write",
                path: fs_path,
                source,
            }
            .into()
        })
    }

    async fn unlink(&self, key: &StorageKey) -> FaultResult<()> {
        if key.is_root() {
            return Err(NativeFault::ScopeRoot(key.to_string()).into());
        }

        let (fs_path, meta) = self.metadata(key).await?;
        let result = if meta.is_dir() {
            let mut entries = fs::read_dir(&fs_path).await.map_err(|source| NativeFault::Io {
                op: "read_dir",
                path: fs_path.clone(),
                source,
            })?;
            let has_child = entries
                .next_entry()
                .await
                .map_err(|source| NativeFault::Io {
                    op: "read_dir",
                    path: fs_path.clone(),
                    source,
                })?
                .is_some();
            if has_child {
                return Err(NativeFault::NotEmpty(key.to_string()).into());
            }
            fs::remove_dir(&fs_path).await
        } else {
            fs::remove_file(&fs_path).await
        };

        result.map_err(|source| {
            if is_missing(&source) {
                NativeFault::NotFound(key.to_string()).into()
            } else {
                NativeFault::Io {
                    op: "unlink",
                    path: fs_path,
                    source,
                }
                .into()
            }
        })
    }

    async fn list_children(&self, key: &StorageKey) -> FaultResult<ChildStream> {
        let (fs_path, meta) = self.metadata(key).await?;
        if !meta.is_dir() {
            return Err(NativeFault::NotDirectory(key.to_string()).into());
        }

        let entries = fs::read_dir(&fs_path).await.map_err(|source| NativeFault::Io {
            op: "read_dir",
            path: fs_path.clone(),
            source,
        })?;

        // Ends after the first error; a fresh call re-enumerates.
        let listing = stream::unfold(Some(entries), move |state| {
            let fs_path = fs_path.clone();
            async move {
                let mut entries = state?;
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let kind = match entry.file_type().await {
                            Ok(file_type) if file_type.is_dir() => FileKind::Directory,
                            _ => FileKind::File,
                        };
                        let name = entry.file_name().to_string_lossy().into_owned();
                        Some((Ok(ChildEntry { name, kind }), Some(entries)))
                    }
                    Ok(None) => None,
                    Err(source) => Some((
                        Err(BackendFault::from(NativeFault::Io {
                            op: "read_dir",
                            path: fs_path,
                            source,
                        })),
                        None,
                    )),
                }
            }
        });

        Ok(Box::pin(listing))
    }

    async fn scan(&self, scope: Scope) -> FaultResult<Vec<ScannedEntry>> {
        let root = self.scope_root(scope).await?;
        let mut results = Vec::new();
        let mut pending = vec![(root, CloudPath::root())];

        while let Some((dir, dir_path)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|source| NativeFault::Io {
                op: "read_dir",
                path: dir.clone(),
                source,
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|source| NativeFault::Io {
                op: "read_dir",
                path: dir.clone(),
                source,
            })? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = match dir_path.child(&name) {
                    Ok(path) => path,
                    Err(err) => {
                        debug!("Skipping unaddressable entry {:?}: {}", entry.path(), err);
                        continue;
                    }
                };
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|file_type| file_type.is_dir())
                    .unwrap_or(false);

                results.push(ScannedEntry {
                    id: self.object_id(scope, &path),
                    path: path.clone(),
                    kind: if is_dir {
                        FileKind::Directory
                    } else {
                        FileKind::File
                    },
                });

                if is_dir {
                    pending.push((entry.path(), path));
                }
            }
        }

        Ok(results)
    }
}
