//! The cloud storage facade.
//!
//! Every operation normalizes its path, resolves the active backend,
//! invokes it, and translates any backend fault into a canonical `Error`.
//! Raw faults never leave this module.

use futures::StreamExt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use cloudfs_common::{to_storage_key, CloudPath, Error, ErrorKind, FileStat, Result, Scope, StorageKey};
use cloudfs_storage::{
    BackendFault, BackendKind, BackendRegistry, ChildEntry, CredentialStore, DriveApi,
    DuplicateSink, HttpDriveApi, NativeSyncedBackend, StorageBackend, TokenDriveBackend,
};
use cloudfs_sync::{
    reconcile_backend, AvailabilitySignal, Change, DuplicateEvent, DuplicateMonitor, HandlerResult,
    ScanReport, ScanScheduler, Subscription,
};

use crate::config::{CloudStorageConfig, ConfigError};

struct Inner {
    registry: BackendRegistry,
    active: Arc<RwLock<BackendKind>>,
    credentials: Arc<CredentialStore>,
    availability: AvailabilitySignal,
    duplicates: Arc<DuplicateMonitor>,
    config: CloudStorageConfig,
}

/// Entry point for all storage operations.
///
/// Cheap to clone; clones share backends, credentials and notification state.
#[derive(Clone)]
pub struct CloudStorage {
    inner: Arc<Inner>,
}

/// Builder for `CloudStorage`.
pub struct CloudStorageBuilder {
    config: CloudStorageConfig,
    credentials: Option<Arc<CredentialStore>>,
    drive_api: Option<Arc<dyn DriveApi>>,
    backends: Vec<Arc<dyn StorageBackend>>,
}

impl CloudStorageBuilder {
    /// Share an existing credential store instead of creating one.
    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Use a drive transport other than HTTP.
    pub fn with_drive_api(mut self, api: Arc<dyn DriveApi>) -> Self {
        self.drive_api = Some(api);
        self
    }

    /// Register a pre-built backend; it takes precedence over the one the
    /// configuration would create for the same kind.
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Construct the facade.
    ///
    /// # Errors
    /// - The configured provider has no backend
    /// - Two injected backends share a kind
    /// - The HTTP drive client cannot be created
    pub fn build(self) -> std::result::Result<CloudStorage, ConfigError> {
        let config = self.config;
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(CredentialStore::new()));

        let duplicates = Arc::new(DuplicateMonitor::new(config.duplicates.fold_case));
        let active = Arc::new(RwLock::new(BackendKind::TokenDrive));
        let availability = AvailabilitySignal::new();
        availability.report(BackendKind::TokenDrive, credentials.is_set());

        let mut registry = BackendRegistry::new();
        for backend in self.backends {
            registry.register(backend)?;
        }

        if !registry.has(BackendKind::TokenDrive) {
            let api: Arc<dyn DriveApi> = match self.drive_api {
                Some(api) => api,
                None => Arc::new(HttpDriveApi::new(config.drive.clone())?),
            };
            let drive = TokenDriveBackend::new(api, Arc::clone(&credentials))
                .with_duplicate_sink(lookup_sink(&duplicates, &active));
            registry.register(Arc::new(drive))?;
        }

        if !registry.has(BackendKind::NativeSynced) {
            if let Some(container) = &config.native.container {
                registry.register(Arc::new(NativeSyncedBackend::new(container)))?;
                availability.report(BackendKind::NativeSynced, container.is_dir());
            }
        }

        let selected = match config.provider {
            Some(kind) if registry.has(kind) => kind,
            Some(kind) => return Err(ConfigError::MissingBackend(kind)),
            None if registry.has(BackendKind::NativeSynced) => BackendKind::NativeSynced,
            None => BackendKind::TokenDrive,
        };
        *active.write().unwrap_or_else(PoisonError::into_inner) = selected;

        info!(provider = %selected, "Cloud storage ready");

        Ok(CloudStorage {
            inner: Arc::new(Inner {
                registry,
                active,
                credentials,
                availability,
                duplicates,
                config,
            }),
        })
    }
}

/// Feed drive lookups that hit several objects into the monitor.
///
/// Only sightings made while the drive is the active backend count; the
/// monitor tracks one backend's ids at a time.
fn lookup_sink(monitor: &Arc<DuplicateMonitor>, active: &Arc<RwLock<BackendKind>>) -> DuplicateSink {
    let monitor = Arc::clone(monitor);
    let active = Arc::clone(active);
    Arc::new(move |key: &StorageKey, ids: &[String]| {
        if *active.read().unwrap_or_else(PoisonError::into_inner) != BackendKind::TokenDrive {
            return;
        }
        monitor.observe_all(ids.iter().map(|id| Change::Present {
            scope: key.scope(),
            path: key.path().clone(),
            id: id.clone(),
        }));
    })
}

/// Translate a backend fault, keeping the raw message as payload.
fn translate(op: &'static str, key: &StorageKey, fault: BackendFault) -> Error {
    let err = Error::from(fault);
    debug!(op, key = %key, kind = %err.kind(), "{}", err.message());
    err
}

fn storage_key(path: &str, scope: Scope) -> Result<StorageKey> {
    Ok(to_storage_key(scope, CloudPath::normalize(path)?))
}

impl CloudStorage {
    /// Start building from a configuration.
    pub fn builder(config: CloudStorageConfig) -> CloudStorageBuilder {
        CloudStorageBuilder {
            config,
            credentials: None,
            drive_api: None,
            backends: Vec::new(),
        }
    }

    /// Build with defaults for everything not in `config`.
    pub fn new(config: CloudStorageConfig) -> std::result::Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CloudStorageConfig {
        &self.inner.config
    }

    fn backend(&self) -> Result<Arc<dyn StorageBackend>> {
        self.inner.registry.resolve(self.provider())
    }

    // ---- Backend selection ----

    /// The active backend kind.
    pub fn provider(&self) -> BackendKind {
        *self.inner.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the active backend.
    ///
    /// Duplicate tracking restarts, since object ids are per backend.
    ///
    /// # Errors
    /// - No backend of that kind is configured
    pub fn set_provider(&self, kind: BackendKind) -> Result<()> {
        self.inner.registry.resolve(kind)?;

        let previous = {
            let mut active = self.inner.active.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, kind)
        };
        if previous != kind {
            self.inner.duplicates.reset();
            info!(from = %previous, to = %kind, "Switched storage provider");
        }
        Ok(())
    }

    /// Kinds with a configured backend.
    pub fn providers(&self) -> Vec<BackendKind> {
        self.inner.registry.kinds()
    }

    // ---- File operations ----

    /// Check if a path exists.
    pub async fn exists(&self, path: &str, scope: Scope) -> Result<bool> {
        let key = storage_key(path, scope)?;
        self.backend()?
            .exists(&key)
            .await
            .map_err(|fault| translate("exists", &key, fault))
    }

    /// Inspect a path.
    ///
    /// A directory is a successful result with `kind = Directory`; branch on
    /// `FileStat::kind`, not on success.
    ///
    /// # Errors
    /// - `FileNotFound` when absent, including below a file
    pub async fn stat(&self, path: &str, scope: Scope) -> Result<FileStat> {
        let key = storage_key(path, scope)?;
        self.backend()?
            .stat(&key)
            .await
            .map_err(|fault| translate("stat", &key, fault))
    }

    /// Create a directory.
    ///
    /// # Preconditions
    /// - Parent directory must exist; ancestors are never created
    ///
    /// # Postconditions
    /// - Succeeds if the directory already exists
    ///
    /// # Errors
    /// - `AlreadyExists` when a file occupies the path
    /// - `FileNotFound` naming the missing parent
    pub async fn mkdir(&self, path: &str, scope: Scope) -> Result<()> {
        let key = storage_key(path, scope)?;
        debug!(key = %key, "Creating directory");
        self.backend()?
            .mkdir(&key)
            .await
            .map_err(|fault| translate("mkdir", &key, fault))
    }

    /// Read a whole file.
    ///
    /// # Errors
    /// - `FileNotFound`
    /// - `Unauthorized` on the drive without a valid credential
    /// - `Unknown` when the path is a directory
    pub async fn read_file(&self, path: &str, scope: Scope) -> Result<Vec<u8>> {
        let key = storage_key(path, scope)?;
        let content = self
            .backend()?
            .read_file(&key)
            .await
            .map_err(|fault| translate("read_file", &key, fault))?;

        debug!(key = %key, size = content.len(), "File read");
        Ok(content)
    }

    /// Read a whole file as UTF-8.
    pub async fn read_to_string(&self, path: &str, scope: Scope) -> Result<String> {
        let content = self.read_file(path, scope).await?;
        String::from_utf8(content)
            .map_err(|e| Error::Unknown(format!("{}: content is not UTF-8: {}", path, e)))
    }

    /// Create or fully overwrite a file.
    ///
    /// # Preconditions
    /// - Parent directory must exist
    ///
    /// # Errors
    /// - `FileNotFound` naming the missing parent
    /// - `Unauthorized` on the drive without a valid credential
    pub async fn write_file(&self, path: &str, scope: Scope, content: &[u8]) -> Result<()> {
        let key = storage_key(path, scope)?;
        self.backend()?
            .write_file(&key, content.to_vec())
            .await
            .map_err(|fault| translate("write_file", &key, fault))?;

        debug!(key = %key, size = content.len(), "File written");
        Ok(())
    }

    /// Append to a file, creating it when absent.
    ///
    /// Not atomic against concurrent writers of the same path.
    pub async fn append_file(&self, path: &str, scope: Scope, content: &[u8]) -> Result<()> {
        let key = storage_key(path, scope)?;
        self.backend()?
            .append_file(&key, content.to_vec())
            .await
            .map_err(|fault| translate("append_file", &key, fault))
    }

    /// Remove a file or an empty directory.
    ///
    /// # Errors
    /// - `DirectoryNotEmpty`
    /// - `FileNotFound`, unless `ignore_missing_on_unlink` is set
    /// - `InvalidPath` for a scope root
    pub async fn unlink(&self, path: &str, scope: Scope) -> Result<()> {
        let key = storage_key(path, scope)?;
        let result = self
            .backend()?
            .unlink(&key)
            .await
            .map_err(|fault| translate("unlink", &key, fault));
        self.tolerate_missing(&key, result)
    }

    /// Remove a directory, with its contents when `recursive`.
    ///
    /// # Errors
    /// - `Unknown` when the path is a file
    /// - `DirectoryNotEmpty` when not recursive and the directory has children
    /// - `FileNotFound`, unless `ignore_missing_on_unlink` is set
    pub async fn rmdir(&self, path: &str, scope: Scope, recursive: bool) -> Result<()> {
        let key = storage_key(path, scope)?;
        let result = self.remove_dir(&key, recursive).await;
        self.tolerate_missing(&key, result)
    }

    async fn remove_dir(&self, key: &StorageKey, recursive: bool) -> Result<()> {
        let backend = self.backend()?;
        let stat = backend
            .stat(key)
            .await
            .map_err(|fault| translate("rmdir", key, fault))?;
        if !stat.is_directory() {
            return Err(Error::Unknown(format!("Not a directory: {}", key)));
        }

        let removal = if recursive {
            backend.remove_tree(key).await
        } else {
            backend.unlink(key).await
        };
        removal.map_err(|fault| translate("rmdir", key, fault))
    }

    /// A directory's children with their kinds, in backend listing order.
    pub async fn read_dir(&self, path: &str, scope: Scope) -> Result<Vec<ChildEntry>> {
        let key = storage_key(path, scope)?;
        let mut children = self
            .backend()?
            .list_children(&key)
            .await
            .map_err(|fault| translate("read_dir", &key, fault))?;

        let mut entries = Vec::new();
        while let Some(child) = children.next().await {
            entries.push(child.map_err(|fault| translate("read_dir", &key, fault))?);
        }
        Ok(entries)
    }

    fn tolerate_missing(&self, key: &StorageKey, result: Result<()>) -> Result<()> {
        match result {
            Err(err) if err.kind() == ErrorKind::FileNotFound && self.inner.config.ignore_missing_on_unlink => {
                debug!(key = %key, "Ignoring removal of missing path");
                Ok(())
            }
            other => other,
        }
    }

    // ---- Credentials ----

    /// Replace the drive credential for every operation issued after this
    /// returns. An empty token clears it.
    pub fn set_credential(&self, token: impl Into<String>) {
        let held = self.inner.credentials.set(token);
        self.inner.availability.report(BackendKind::TokenDrive, held);
    }

    /// Drop the drive credential; drive operations fail `Unauthorized`.
    pub fn clear_credential(&self) {
        self.inner.credentials.clear();
        self.inner.availability.report(BackendKind::TokenDrive, false);
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }

    // ---- Availability ----

    /// Last known availability; never blocks.
    pub fn is_cloud_available(&self) -> bool {
        self.inner.availability.current()
    }

    pub fn availability(&self) -> &AvailabilitySignal {
        &self.inner.availability
    }

    /// Register a handler called on availability transitions.
    pub fn subscribe_to_availability<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&bool) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.availability.subscribe(handler)
    }

    /// Record a backend state change reported by the environment.
    pub fn report_backend_state(&self, kind: BackendKind, available: bool) -> bool {
        self.inner.availability.report(kind, available)
    }

    /// Probe every configured backend and recompute availability.
    pub async fn refresh_availability(&self) -> bool {
        self.inner.availability.refresh(&self.inner.registry.all()).await
    }

    // ---- Duplicate names ----

    /// Register a handler for duplicate-name events.
    pub fn subscribe_to_duplicate_names<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DuplicateEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.duplicates.subscribe(handler)
    }

    /// Feed a change notification from the active backend.
    pub fn notify_change(&self, change: Change) -> Vec<DuplicateEvent> {
        self.inner.duplicates.observe(change)
    }

    /// Reconcile one scope of the active backend now.
    pub async fn scan_duplicates(&self, scope: Scope) -> Result<Vec<DuplicateEvent>> {
        let backend = self.backend()?;
        self.inner.duplicates.scan_backend(backend.as_ref(), scope).await
    }

    /// Reconcile every scope of the active backend now.
    pub async fn scan_all_duplicates(&self) -> ScanReport {
        match self.backend() {
            Ok(backend) => reconcile_backend(&self.inner.duplicates, backend.as_ref()).await,
            Err(e) => {
                warn!("Duplicate scan skipped: {}", e);
                ScanReport {
                    failures: Scope::ALL.len(),
                    ..Default::default()
                }
            }
        }
    }

    /// Start background reconciliation on the configured interval.
    ///
    /// Scans stop when the returned scheduler is dropped or shut down.
    pub fn start_duplicate_scanner(&self) -> ScanScheduler {
        let storage = self.clone();
        ScanScheduler::spawn(self.inner.config.duplicates.scan_interval(), move || {
            let storage = storage.clone();
            async move { storage.scan_all_duplicates().await }
        })
    }

    /// Groups currently holding more than one object.
    pub fn duplicates(&self) -> Vec<DuplicateEvent> {
        self.inner.duplicates.duplicates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudfs_storage::MemoryDriveApi;
    use std::path::PathBuf;

    #[test]
    fn test_default_provider_is_drive_without_container() {
        let storage = CloudStorage::builder(CloudStorageConfig::default())
            .with_drive_api(Arc::new(MemoryDriveApi::new()))
            .build()
            .unwrap();
        assert_eq!(storage.provider(), BackendKind::TokenDrive);
        assert_eq!(storage.providers(), vec![BackendKind::TokenDrive]);
    }

    #[test]
    fn test_default_provider_is_native_with_container() {
        let mut config = CloudStorageConfig::default();
        config.native.container = Some(PathBuf::from("/nonexistent/container"));
        let storage = CloudStorage::builder(config)
            .with_drive_api(Arc::new(MemoryDriveApi::new()))
            .build()
            .unwrap();
        assert_eq!(storage.provider(), BackendKind::NativeSynced);
    }

    #[test]
    fn test_missing_configured_provider() {
        let mut config = CloudStorageConfig::default();
        config.provider = Some(BackendKind::NativeSynced);
        let result = CloudStorage::builder(config)
            .with_drive_api(Arc::new(MemoryDriveApi::new()))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::MissingBackend(BackendKind::NativeSynced))
        ));
    }

    #[test]
    fn test_set_provider_requires_backend() {
        let storage = CloudStorage::builder(CloudStorageConfig::default())
            .with_drive_api(Arc::new(MemoryDriveApi::new()))
            .build()
            .unwrap();
        let err = storage.set_provider(BackendKind::NativeSynced).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(storage.provider(), BackendKind::TokenDrive);
    }

    #[test]
    fn test_http_drive_is_default_transport() {
        assert!(CloudStorage::new(CloudStorageConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_path_rejected_before_dispatch() {
        let api = Arc::new(MemoryDriveApi::new());
        let storage = CloudStorage::builder(CloudStorageConfig::default())
            .with_drive_api(api.clone())
            .build()
            .unwrap();
        storage.set_credential("token");

        let err = storage.read_file("a//b", Scope::Documents).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
        assert_eq!(api.requests(), 0);
    }
}
