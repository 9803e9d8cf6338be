//! Derived cloud availability flag.
//!
//! Each backend's usability is pushed in by the environment (`report`) or
//! probed on demand (`refresh`); the signal is true while any backend is
//! usable. Reads never block and return the last computed value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};

use cloudfs_storage::{BackendKind, StorageBackend};

use crate::subscribers::{HandlerResult, Subscribers, Subscription};

/// Process-wide availability state.
pub struct AvailabilitySignal {
    backends: Mutex<HashMap<BackendKind, bool>>,
    value: watch::Sender<bool>,
    subscribers: Subscribers<bool>,
}

impl AvailabilitySignal {
    /// Create a signal that starts unavailable.
    pub fn new() -> Self {
        let (value, _) = watch::channel(false);
        Self {
            backends: Mutex::new(HashMap::new()),
            value,
            subscribers: Subscribers::new("availability"),
        }
    }

    /// Last computed value.
    pub fn current(&self) -> bool {
        *self.value.borrow()
    }

    /// Observe the value through a watch channel.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.value.subscribe()
    }

    /// Register a handler called with the new value on every transition.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&bool) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    /// Record a backend state change pushed by the environment.
    pub fn report(&self, kind: BackendKind, available: bool) -> bool {
        let mut backends = self.backends.lock().unwrap_or_else(PoisonError::into_inner);
        if backends.insert(kind, available) != Some(available) {
            debug!("Backend {} reported {}", kind, if available { "available" } else { "unavailable" });
        }
        self.recompute(&backends)
    }

    /// Probe every backend and recompute.
    pub async fn refresh(&self, backends: &[Arc<dyn StorageBackend>]) -> bool {
        let mut probed = Vec::with_capacity(backends.len());
        for backend in backends {
            probed.push((backend.kind(), backend.is_available().await));
        }

        let mut states = self.backends.lock().unwrap_or_else(PoisonError::into_inner);
        states.extend(probed);
        self.recompute(&states)
    }

    /// Runs under the state lock so concurrent reports publish in order.
    fn recompute(&self, backends: &HashMap<BackendKind, bool>) -> bool {
        let derived = backends.values().any(|available| *available);

        let changed = self.value.send_if_modified(|value| {
            if *value == derived {
                false
            } else {
                *value = derived;
                true
            }
        });

        if changed {
            info!("Cloud storage is now {}", if derived { "available" } else { "unavailable" });
            self.subscribers.publish(&derived);
        }
        derived
    }
}

impl Default for AvailabilitySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudfs_storage::{CredentialStore, MemoryDriveApi, NativeSyncedBackend, TokenDriveBackend};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[test]
    fn test_any_backend_available() {
        let signal = AvailabilitySignal::new();
        assert!(!signal.current());

        assert!(signal.report(BackendKind::NativeSynced, true));
        assert!(signal.report(BackendKind::TokenDrive, false));
        assert!(signal.current());

        assert!(!signal.report(BackendKind::NativeSynced, false));
        assert!(!signal.current());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions_only() {
        let signal = AvailabilitySignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = signal.subscribe(move |value| {
            tx.send(*value)?;
            Ok(())
        });

        signal.report(BackendKind::TokenDrive, true);
        signal.report(BackendKind::NativeSynced, true);
        signal.report(BackendKind::TokenDrive, false);
        signal.report(BackendKind::NativeSynced, false);

        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(first, Some(true));
        assert_eq!(second, Some(false));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_receiver() {
        let signal = AvailabilitySignal::new();
        let mut rx = signal.watch();

        signal.report(BackendKind::TokenDrive, true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_refresh_probes_backends() {
        let temp = tempfile::TempDir::new().unwrap();
        let credentials = Arc::new(CredentialStore::new());
        let backends: Vec<Arc<dyn StorageBackend>> = vec![
            Arc::new(NativeSyncedBackend::new(temp.path().join("missing"))),
            Arc::new(TokenDriveBackend::new(
                Arc::new(MemoryDriveApi::new()),
                credentials.clone(),
            )),
        ];

        let signal = AvailabilitySignal::new();
        assert!(!signal.refresh(&backends).await);

        credentials.set("token");
        assert!(signal.refresh(&backends).await);

        credentials.clear();
        std::fs::create_dir(temp.path().join("missing")).unwrap();
        assert!(signal.refresh(&backends).await);
    }
}
