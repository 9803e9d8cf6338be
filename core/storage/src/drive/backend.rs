//! Token-authenticated drive backend.
//!
//! Paths are resolved one segment at a time by name lookup. The drive allows
//! several objects with the same name in one folder; lookups act on the
//! first match in listing order and hand every matching id to the duplicate
//! sink, when one is attached.
//! Nothing is cached between calls, so external edits are always seen.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use cloudfs_common::{CloudPath, FileKind, FileStat, Scope, StorageKey};

use crate::backend::{BackendKind, ChildEntry, ChildStream, ScannedEntry, StorageBackend};
use crate::credential::{Credential, CredentialStore};
use crate::fault::{BackendFault, FaultResult};

use super::api::{DriveApi, DriveFault, DriveFile, DriveSpace, FOLDER_MIME_TYPE};

/// Receives every object id behind one logical path when a lookup finds
/// more than one.
pub type DuplicateSink = Arc<dyn Fn(&StorageKey, &[String]) + Send + Sync>;

/// Drive backend authenticated by the shared credential store.
pub struct TokenDriveBackend {
    api: Arc<dyn DriveApi>,
    credentials: Arc<CredentialStore>,
    duplicates: Option<DuplicateSink>,
}

/// Pager state behind a lazy listing.
struct Listing {
    api: Arc<dyn DriveApi>,
    credential: Arc<Credential>,
    space: DriveSpace,
    folder_id: String,
    buffered: VecDeque<DriveFile>,
    next_page: Option<String>,
    exhausted: bool,
}

fn file_kind(file: &DriveFile) -> FileKind {
    if file.is_folder() {
        FileKind::Directory
    } else {
        FileKind::File
    }
}

/// Stand-in for a space root; roots are addressed by alias and need no lookup.
fn space_root(space: DriveSpace) -> DriveFile {
    DriveFile {
        id: space.root_id().to_string(),
        name: String::new(),
        mime_type: FOLDER_MIME_TYPE.to_string(),
        size: None,
        modified_time: None,
        parents: Vec::new(),
        trashed: false,
    }
}

impl TokenDriveBackend {
    /// Create a backend over a drive transport.
    pub fn new(api: Arc<dyn DriveApi>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            api,
            credentials,
            duplicates: None,
        }
    }

    /// Report name collisions met during path lookups.
    pub fn with_duplicate_sink(mut self, sink: DuplicateSink) -> Self {
        self.duplicates = Some(sink);
        self
    }

    /// The credential store requests are authorized from.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Snapshot the credential for one operation.
    fn credential(&self) -> Result<Arc<Credential>, DriveFault> {
        self.credentials
            .snapshot()
            .ok_or(DriveFault::MissingCredential)
    }

    /// Every non-trashed child of a folder, following pagination.
    async fn list_all(
        &self,
        credential: &Credential,
        space: DriveSpace,
        folder_id: &str,
        name: Option<&str>,
    ) -> Result<Vec<DriveFile>, DriveFault> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .api
                .list_page(credential, space, folder_id, name, page_token.as_deref())
                .await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }

    /// Find the object `child` names inside `folder_id`.
    async fn find_child(
        &self,
        credential: &Credential,
        folder_id: &str,
        child: &StorageKey,
    ) -> Result<Option<DriveFile>, DriveFault> {
        let name = child.name().unwrap_or_default();
        let space = DriveSpace::from(child.scope());
        let matches: Vec<DriveFile> = self
            .list_all(credential, space, folder_id, Some(name))
            .await?
            .into_iter()
            .filter(|file| file.name == name)
            .collect();

        if matches.len() > 1 {
            warn!(
                "{} objects at {} in folder {}; using {}",
                matches.len(),
                child,
                folder_id,
                matches[0].id
            );
            if let Some(sink) = &self.duplicates {
                let ids: Vec<String> = matches.iter().map(|file| file.id.clone()).collect();
                sink(child, &ids);
            }
        }
        Ok(matches.into_iter().next())
    }

    /// Walk a key from its scope root. `None` when any segment is missing
    /// or an intermediate segment is a file.
    async fn resolve(
        &self,
        credential: &Credential,
        key: &StorageKey,
    ) -> Result<Option<DriveFile>, DriveFault> {
        let space = DriveSpace::from(key.scope());
        let mut current = space_root(space);

        for depth in 1..=key.path().segments().len() {
            if !current.is_folder() {
                return Ok(None);
            }
            let child = StorageKey::new(key.scope(), key.path().prefix(depth));
            match self.find_child(credential, &current.id, &child).await? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// Resolve the folder a key would live in.
    async fn resolve_parent(
        &self,
        credential: &Credential,
        key: &StorageKey,
    ) -> Result<DriveFile, DriveFault> {
        let Some(parent) = key.parent() else {
            return Ok(space_root(DriveSpace::from(key.scope())));
        };
        match self.resolve(credential, &parent).await? {
            Some(folder) if folder.is_folder() => Ok(folder),
            _ => Err(DriveFault::ParentMissing(parent.to_string())),
        }
    }

    fn create_stat(key: &StorageKey, file: &DriveFile) -> FileStat {
        FileStat {
            kind: file_kind(file),
            size: if file.is_folder() {
                None
            } else {
                Some(file.size_bytes().unwrap_or(0))
            },
            modified: file.modified_time.unwrap_or_else(Utc::now),
            scope: key.scope(),
            id: file.id.clone(),
        }
    }
}

#[async_trait]
impl StorageBackend for TokenDriveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::TokenDrive
    }

    async fn is_available(&self) -> bool {
        self.credentials.is_set()
    }

    async fn exists(&self, key: &StorageKey) -> FaultResult<bool> {
        let credential = self.credential()?;
        Ok(self.resolve(&credential, key).await?.is_some())
    }

    async fn stat(&self, key: &StorageKey) -> FaultResult<FileStat> {
        let credential = self.credential()?;
        let file = self
            .resolve(&credential, key)
            .await?
            .ok_or_else(|| DriveFault::NotFound(key.to_string()))?;
        Ok(Self::create_stat(key, &file))
    }

    async fn mkdir(&self, key: &StorageKey) -> FaultResult<()> {
        let credential = self.credential()?;

        match self.resolve(&credential, key).await? {
            Some(existing) if existing.is_folder() => return Ok(()),
            Some(_) => return Err(DriveFault::FileExists(key.to_string()).into()),
            None => {}
        }

        let parent = self.resolve_parent(&credential, key).await?;
        let name = key.name().unwrap_or_default();
        let folder = self.api.create_folder(&credential, name, &parent.id).await?;
        debug!("Created drive folder {} ({})", key, folder.id);
        Ok(())
    }

    async fn read_file(&self, key: &StorageKey) -> FaultResult<Vec<u8>> {
        let credential = self.credential()?;
        let file = self
            .resolve(&credential, key)
            .await?
            .ok_or_else(|| DriveFault::NotFound(key.to_string()))?;
        if file.is_folder() {
            return Err(DriveFault::IsDirectory(key.to_string()).into());
        }

        Ok(self.api.download(&credential, &file.id).await?)
    }

    async fn write_file(&self, key: &StorageKey, data: Vec<u8>) -> FaultResult<()> {
        let credential = self.credential()?;
        let Some(name) = key.name() else {
            return Err(DriveFault::IsDirectory(key.to_string()).into());
        };

        let parent = self.resolve_parent(&credential, key).await?;
        match self.find_child(&credential, &parent.id, key).await? {
            Some(existing) if existing.is_folder() => {
                Err(DriveFault::IsDirectory(key.to_string()).into())
            }
            Some(existing) => {
                self.api.update_file(&credential, &existing.id, data).await?;
                Ok(())
            }
            None => {
                let file = self.api.create_file(&credential, name, &parent.id, data).await?;
                debug!("Created drive file {} ({})", key, file.id);
                Ok(())
            }
        }
    }

    async fn unlink(&self, key: &StorageKey) -> FaultResult<()> {
        let credential = self.credential()?;
        if key.is_root() {
            return Err(DriveFault::ScopeRoot(key.to_string()).into());
        }
        let space = DriveSpace::from(key.scope());

        let file = self
            .resolve(&credential, key)
            .await?
            .ok_or_else(|| DriveFault::NotFound(key.to_string()))?;

        if file.is_folder() {
            let page = self
                .api
                .list_page(&credential, space, &file.id, None, None)
                .await?;
            if !page.files.is_empty() {
                return Err(DriveFault::NotEmpty(key.to_string()).into());
            }
        }

        self.api.delete(&credential, &file.id).await?;
        Ok(())
    }

    async fn list_children(&self, key: &StorageKey) -> FaultResult<ChildStream> {
        let credential = self.credential()?;
        let file = self
            .resolve(&credential, key)
            .await?
            .ok_or_else(|| DriveFault::NotFound(key.to_string()))?;
        if !file.is_folder() {
            return Err(DriveFault::NotDirectory(key.to_string()).into());
        }

        let listing = Listing {
            api: Arc::clone(&self.api),
            credential,
            space: DriveSpace::from(key.scope()),
            folder_id: file.id,
            buffered: VecDeque::new(),
            next_page: None,
            exhausted: false,
        };

        // Pages are fetched on demand; the stream ends after the first error.
        let children = stream::unfold(Some(listing), |state| async move {
            let mut listing = state?;
            loop {
                if let Some(file) = listing.buffered.pop_front() {
                    let entry = ChildEntry {
                        kind: file_kind(&file),
                        name: file.name,
                    };
                    return Some((Ok(entry), Some(listing)));
                }
                if listing.exhausted {
                    return None;
                }

                let page = listing
                    .api
                    .list_page(
                        &listing.credential,
                        listing.space,
                        &listing.folder_id,
                        None,
                        listing.next_page.as_deref(),
                    )
                    .await;
                match page {
                    Ok(page) => {
                        listing.buffered.extend(page.files);
                        listing.exhausted = page.next_page_token.is_none();
                        listing.next_page = page.next_page_token;
                    }
                    Err(fault) => return Some((Err(BackendFault::from(fault)), None)),
                }
            }
        });

        Ok(Box::pin(children))
    }

    async fn scan(&self, scope: Scope) -> FaultResult<Vec<ScannedEntry>> {
        let credential = self.credential()?;
        let space = DriveSpace::from(scope);
        let mut results = Vec::new();
        let mut pending = VecDeque::from([(space.root_id().to_string(), CloudPath::root())]);

        while let Some((folder_id, folder_path)) = pending.pop_front() {
            for file in self.list_all(&credential, space, &folder_id, None).await? {
                let path = match folder_path.child(&file.name) {
                    Ok(path) => path,
                    Err(err) => {
                        debug!("Skipping unaddressable drive object {}: {}", file.id, err);
                        continue;
                    }
                };

                if file.is_folder() {
                    pending.push_back((file.id.clone(), path.clone()));
                }
                results.push(ScannedEntry {
                    kind: file_kind(&file),
                    id: file.id,
                    path,
                });
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::MemoryDriveApi;
    use cloudfs_common::{Error, ErrorKind};
    use futures::StreamExt;

    fn key(scope: Scope, raw: &str) -> StorageKey {
        StorageKey::new(scope, CloudPath::normalize(raw).unwrap())
    }

    fn kind_of(fault: BackendFault) -> ErrorKind {
        Error::from(fault).kind()
    }

    fn setup_with(api: MemoryDriveApi) -> (Arc<MemoryDriveApi>, TokenDriveBackend) {
        let api = Arc::new(api);
        let credentials = Arc::new(CredentialStore::new());
        credentials.set("test-token");
        let backend = TokenDriveBackend::new(api.clone(), credentials);
        (api, backend)
    }

    fn setup() -> (Arc<MemoryDriveApi>, TokenDriveBackend) {
        setup_with(MemoryDriveApi::new())
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let (_, backend) = setup();
        let file = key(Scope::Documents, "hello.txt");

        backend.write_file(&file, b"Hello, Drive!".to_vec()).await.unwrap();
        assert_eq!(backend.read_file(&file).await.unwrap(), b"Hello, Drive!");

        backend.write_file(&file, b"again".to_vec()).await.unwrap();
        assert_eq!(backend.read_file(&file).await.unwrap(), b"again");

        let stat = backend.stat(&file).await.unwrap();
        assert!(stat.is_file());
        assert_eq!(stat.size, Some(5));
    }

    #[tokio::test]
    async fn test_nested_mkdir_and_write() {
        let (_, backend) = setup();

        backend.mkdir(&key(Scope::Documents, "projects")).await.unwrap();
        backend
            .write_file(&key(Scope::Documents, "projects/a.txt"), b"x".to_vec())
            .await
            .unwrap();

        assert!(backend.exists(&key(Scope::Documents, "projects/a.txt")).await.unwrap());
        assert!(!backend.exists(&key(Scope::AppData, "projects/a.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let (_, backend) = setup();
        let docs = key(Scope::Documents, "same.txt");
        let app = key(Scope::AppData, "same.txt");

        backend.write_file(&docs, b"docs".to_vec()).await.unwrap();
        backend.write_file(&app, b"app".to_vec()).await.unwrap();

        assert_eq!(backend.read_file(&docs).await.unwrap(), b"docs");
        assert_eq!(backend.read_file(&app).await.unwrap(), b"app");
        assert_ne!(
            backend.stat(&docs).await.unwrap().id,
            backend.stat(&app).await.unwrap().id
        );
    }

    #[tokio::test]
    async fn test_mkdir_is_idempotent() {
        let (api, backend) = setup();
        let dir = key(Scope::AppData, "cache");

        backend.mkdir(&dir).await.unwrap();
        backend.mkdir(&dir).await.unwrap();
        assert_eq!(api.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_parent() {
        let (_, backend) = setup();

        let err = backend
            .write_file(&key(Scope::Documents, "missing/a.txt"), vec![])
            .await
            .unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::FileNotFound);

        let err = backend.mkdir(&key(Scope::Documents, "a/b")).await.unwrap_err();
        assert!(err.to_string().contains("documents:/a"));
    }

    #[tokio::test]
    async fn test_unlink_semantics() {
        let (_, backend) = setup();
        let dir = key(Scope::Documents, "dir");
        let file = key(Scope::Documents, "dir/file.txt");

        backend.mkdir(&dir).await.unwrap();
        backend.write_file(&file, vec![1]).await.unwrap();

        let err = backend.unlink(&dir).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::DirectoryNotEmpty);

        backend.unlink(&file).await.unwrap();
        backend.unlink(&dir).await.unwrap();

        let err = backend.unlink(&dir).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::FileNotFound);

        let err = backend.unlink(&StorageKey::root(Scope::Documents)).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::InvalidPath);
    }

    #[tokio::test]
    async fn test_cleared_credential_fails_without_requests() {
        let (api, backend) = setup();
        backend.credentials().clear();

        let err = backend.exists(&key(Scope::Documents, "a.txt")).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::Unauthorized);
        assert!(!backend.is_available().await);
        assert_eq!(api.requests(), 0);
    }

    #[tokio::test]
    async fn test_rejected_token_is_unauthorized() {
        let (api, backend) = setup();
        api.revoke_all().await;

        let err = backend.read_file(&key(Scope::Documents, "a.txt")).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::Unauthorized);

        api.accept_token("rotated").await;
        backend.credentials().set("rotated");
        assert!(!backend.exists(&key(Scope::Documents, "a.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_outage_is_unavailable() {
        let (api, backend) = setup();
        api.set_outage(true).await;

        let err = backend.stat(&key(Scope::Documents, "a.txt")).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_duplicate_names_use_first_match() {
        let (api, backend) = setup();
        let cred = Credential::new("test-token").unwrap();

        let first = api.create_file(&cred, "dup.txt", "root", b"first".to_vec()).await.unwrap();
        api.create_file(&cred, "dup.txt", "root", b"second".to_vec()).await.unwrap();

        let file = key(Scope::Documents, "dup.txt");
        assert_eq!(backend.read_file(&file).await.unwrap(), b"first");
        assert_eq!(backend.stat(&file).await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_duplicate_lookup_reaches_sink() {
        let (api, backend) = setup();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let backend = backend.with_duplicate_sink(Arc::new(move |key: &StorageKey, ids: &[String]| {
            recorder.lock().unwrap().push((key.clone(), ids.to_vec()));
        }));
        let cred = Credential::new("test-token").unwrap();

        let folder = api.create_folder(&cred, "notes", "root").await.unwrap();
        let first = api.create_file(&cred, "todo.txt", &folder.id, b"a".to_vec()).await.unwrap();
        let second = api.create_file(&cred, "todo.txt", &folder.id, b"b".to_vec()).await.unwrap();

        let file = key(Scope::Documents, "notes/todo.txt");
        assert_eq!(backend.read_file(&file).await.unwrap(), b"a");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, file);
        assert_eq!(seen[0].1, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_missing_credential_precedes_root_checks() {
        let (api, backend) = setup();
        backend.credentials().clear();
        let root = StorageKey::root(Scope::Documents);

        let err = backend.write_file(&root, b"x".to_vec()).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::Unauthorized);
        let err = backend.unlink(&root).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::Unauthorized);
        assert_eq!(api.requests(), 0);
    }

    #[tokio::test]
    async fn test_list_children_follows_pages() {
        let (_, backend) = setup_with(MemoryDriveApi::new().with_page_size(2));
        backend.mkdir(&key(Scope::Documents, "dir")).await.unwrap();
        for i in 0..5 {
            backend
                .write_file(&key(Scope::Documents, &format!("dir/f{}", i)), vec![])
                .await
                .unwrap();
        }

        let names: Vec<String> = backend
            .list_children(&key(Scope::Documents, "dir"))
            .await
            .unwrap()
            .map(|entry| entry.unwrap().name)
            .collect()
            .await;
        assert_eq!(names, vec!["f0", "f1", "f2", "f3", "f4"]);
    }

    #[tokio::test]
    async fn test_list_children_of_file() {
        let (_, backend) = setup();
        let file = key(Scope::Documents, "a.txt");
        backend.write_file(&file, vec![]).await.unwrap();

        assert!(backend.list_children(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_reports_duplicates_separately() {
        let (api, backend) = setup();
        let cred = Credential::new("test-token").unwrap();

        backend.mkdir(&key(Scope::AppData, "dir")).await.unwrap();
        backend.write_file(&key(Scope::AppData, "dir/x"), vec![]).await.unwrap();
        api.create_file(&cred, "y", "appDataFolder", vec![]).await.unwrap();
        api.create_file(&cred, "y", "appDataFolder", vec![]).await.unwrap();

        let entries = backend.scan(Scope::AppData).await.unwrap();
        assert_eq!(entries.len(), 4);

        let ys: Vec<_> = entries
            .iter()
            .filter(|e| e.path.to_string_path() == "/y")
            .collect();
        assert_eq!(ys.len(), 2);
        assert_ne!(ys[0].id, ys[1].id);

        assert!(entries.iter().any(|e| e.path.to_string_path() == "/dir/x"));
        assert!(backend.scan(Scope::Documents).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_below_file_is_not_found() {
        let (_, backend) = setup();
        backend.write_file(&key(Scope::Documents, "a.txt"), vec![]).await.unwrap();

        let err = backend.stat(&key(Scope::Documents, "a.txt/b")).await.unwrap_err();
        assert_eq!(kind_of(err), ErrorKind::FileNotFound);
    }

    #[tokio::test]
    async fn test_remove_tree() {
        let (api, backend) = setup();
        backend.mkdir(&key(Scope::Documents, "a")).await.unwrap();
        backend.mkdir(&key(Scope::Documents, "a/b")).await.unwrap();
        backend.write_file(&key(Scope::Documents, "a/b/c.txt"), vec![]).await.unwrap();

        backend.remove_tree(&key(Scope::Documents, "a")).await.unwrap();
        assert_eq!(api.object_count().await, 0);
    }
}
