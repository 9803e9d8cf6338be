//! Bearer credential holder for the remote drive.
//!
//! The store is a holder, not a refresher: callers rotate the token before it
//! expires. Operations take a snapshot when they are issued, so a swap never
//! changes the credential of a call already in flight.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use zeroize::Zeroize;

/// Opaque bearer token; zeroized on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token. Returns `None` for an empty or blank token.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return None;
        }
        Some(Self(token))
    }

    /// The raw token.
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED; {} bytes])", self.0.len())
    }
}

/// Process-wide credential slot with atomic replacement.
///
/// Construct one per process (or per test) and share it by `Arc`.
pub struct CredentialStore {
    slot: watch::Sender<Option<Arc<Credential>>>,
}

impl CredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// Replace the held credential.
    ///
    /// An empty token clears the store. Returns whether a credential is held
    /// afterwards.
    pub fn set(&self, token: impl Into<String>) -> bool {
        match Credential::new(token) {
            Some(credential) => {
                self.slot.send_replace(Some(Arc::new(credential)));
                info!("Drive credential replaced");
                true
            }
            None => {
                self.clear();
                false
            }
        }
    }

    /// Drop the held credential; drive calls fail unauthorized until the next `set`.
    pub fn clear(&self) {
        if self.slot.send_replace(None).is_some() {
            info!("Drive credential cleared");
        }
    }

    /// The credential as of now.
    pub fn snapshot(&self) -> Option<Arc<Credential>> {
        self.slot.borrow().clone()
    }

    /// Check if a credential is held.
    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Observe replacements.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<Credential>>> {
        self.slot.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_is_absent() {
        assert!(Credential::new("").is_none());
        assert!(Credential::new("   ").is_none());
        assert!(Credential::new("ya29.token").is_some());
    }

    #[test]
    fn test_debug_is_redacted() {
        let credential = Credential::new("ya29.secret").unwrap();
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("secret"));
        assert_eq!(credential.bearer(), "Bearer ya29.secret");
    }

    #[test]
    fn test_set_replace_clear() {
        let store = CredentialStore::new();
        assert!(store.snapshot().is_none());

        assert!(store.set("first"));
        assert_eq!(store.snapshot().unwrap().secret(), "first");

        assert!(store.set("second"));
        assert_eq!(store.snapshot().unwrap().secret(), "second");

        store.clear();
        assert!(!store.is_set());
    }

    #[test]
    fn test_snapshot_survives_replacement() {
        let store = CredentialStore::new();
        store.set("issued");
        let in_flight = store.snapshot().unwrap();

        store.set("rotated");

        assert_eq!(in_flight.secret(), "issued");
        assert_eq!(store.snapshot().unwrap().secret(), "rotated");
    }

    #[test]
    fn test_setting_empty_clears() {
        let store = CredentialStore::new();
        store.set("token");
        assert!(!store.set(""));
        assert!(!store.is_set());
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let store = CredentialStore::new();
        let mut rx = store.watch();
        store.set("token");
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());
    }
}
