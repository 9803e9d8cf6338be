//! Duplicate-name detection.
//!
//! Backends can hold several distinct objects that resolve to one logical
//! path: the drive allows repeated names in a folder, and with case folding
//! `Notes` and `notes` collapse together. The monitor groups object ids by
//! `(scope, path)` and reports a group once when it grows past one member.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use cloudfs_common::{CloudPath, Error, Result, Scope};
use cloudfs_storage::{ScannedEntry, StorageBackend};

use crate::subscribers::{HandlerResult, Subscribers, Subscription};

/// Two or more objects resolving to one logical path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateEvent {
    pub scope: Scope,
    /// Path of a current member, as that member was observed.
    pub path: CloudPath,
    /// Distinct backend ids, sorted.
    pub ids: Vec<String>,
}

/// A backend change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// An object exists at `path` (created, renamed, or seen by a scan).
    Present {
        scope: Scope,
        path: CloudPath,
        id: String,
    },
    /// An object is gone.
    Removed { scope: Scope, id: String },
}

type GroupKey = (Scope, CloudPath);

struct Group {
    /// Reported path; always held by at least one member.
    path: CloudPath,
    /// Member ids with the path each was observed at.
    members: BTreeMap<String, CloudPath>,
    /// Set once the group has been reported; cleared when it shrinks to one.
    fired: bool,
}

impl Group {
    /// Move the reported path to a remaining member once no member holds it.
    fn follow_members(&mut self) {
        if self.members.values().any(|path| *path == self.path) {
            return;
        }
        if let Some(path) = self.members.values().next() {
            self.path = path.clone();
        }
    }

    fn event(&self, scope: Scope) -> DuplicateEvent {
        DuplicateEvent {
            scope,
            path: self.path.clone(),
            ids: self.members.keys().cloned().collect(),
        }
    }
}

#[derive(Default)]
struct Groups {
    groups: HashMap<GroupKey, Group>,
    /// Where each object currently sits.
    index: HashMap<(Scope, String), GroupKey>,
}

impl Groups {
    fn insert(&mut self, key: GroupKey, path: CloudPath, id: String, touched: &mut HashSet<GroupKey>) {
        let scope = key.0;
        if let Some(previous) = self.index.get(&(scope, id.clone())).cloned() {
            if previous == key {
                // Same group, possibly under a different case.
                if let Some(group) = self.groups.get_mut(&key) {
                    group.members.insert(id, path);
                    group.follow_members();
                }
                return;
            }
            self.detach(scope, &id, &previous);
            touched.insert(previous);
        }

        self.groups
            .entry(key.clone())
            .or_insert_with(|| Group {
                path: path.clone(),
                members: BTreeMap::new(),
                fired: false,
            })
            .members
            .insert(id.clone(), path);
        self.index.insert((scope, id), key.clone());
        touched.insert(key);
    }

    fn remove(&mut self, scope: Scope, id: &str, touched: &mut HashSet<GroupKey>) {
        if let Some(key) = self.index.remove(&(scope, id.to_string())) {
            self.detach(scope, id, &key);
            touched.insert(key);
        }
    }

    fn detach(&mut self, scope: Scope, id: &str, key: &GroupKey) {
        self.index.remove(&(scope, id.to_string()));
        if let Some(group) = self.groups.get_mut(key) {
            group.members.remove(id);
            group.follow_members();
        }
    }

    /// Apply the edge trigger to every touched group.
    fn evaluate(&mut self, touched: HashSet<GroupKey>) -> Vec<DuplicateEvent> {
        let mut events = Vec::new();

        for key in touched {
            let Some(group) = self.groups.get_mut(&key) else {
                continue;
            };

            if group.members.len() >= 2 {
                if !group.fired {
                    group.fired = true;
                    events.push(group.event(key.0));
                }
            } else {
                group.fired = false;
                if group.members.is_empty() {
                    self.groups.remove(&key);
                }
            }
        }

        events.sort_by(|a, b| (a.scope, &a.path).cmp(&(b.scope, &b.path)));
        events
    }
}

/// Groups backend objects by logical path and reports collisions.
pub struct DuplicateMonitor {
    fold_case: bool,
    state: Mutex<Groups>,
    subscribers: Subscribers<DuplicateEvent>,
}

impl DuplicateMonitor {
    /// Create a monitor. With `fold_case`, paths differing only in case
    /// share a group.
    pub fn new(fold_case: bool) -> Self {
        Self {
            fold_case,
            state: Mutex::new(Groups::default()),
            subscribers: Subscribers::new("duplicate-names"),
        }
    }

    /// Register a handler for duplicate events.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DuplicateEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    fn group_key(&self, scope: Scope, path: &CloudPath) -> GroupKey {
        if !self.fold_case {
            return (scope, path.clone());
        }
        let folded = CloudPath::from_segments(path.segments().iter().map(|s| s.to_lowercase()))
            .unwrap_or_else(|_| path.clone());
        (scope, folded)
    }

    /// Apply one change notification.
    pub fn observe(&self, change: Change) -> Vec<DuplicateEvent> {
        self.observe_all([change])
    }

    /// Apply a batch of change notifications, evaluating groups once at the end.
    pub fn observe_all(&self, changes: impl IntoIterator<Item = Change>) -> Vec<DuplicateEvent> {
        let events = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let mut touched = HashSet::new();

            for change in changes {
                match change {
                    Change::Present { scope, path, id } => {
                        let key = self.group_key(scope, &path);
                        state.insert(key, path, id, &mut touched);
                    }
                    Change::Removed { scope, id } => state.remove(scope, &id, &mut touched),
                }
            }

            state.evaluate(touched)
        };

        self.publish(&events);
        events
    }

    /// Replace everything known about a scope with a full listing.
    ///
    /// Objects absent from `entries` are treated as removed.
    pub fn reconcile(&self, scope: Scope, entries: &[ScannedEntry]) -> Vec<DuplicateEvent> {
        let events = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let mut touched = HashSet::new();

            let listed: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
            let stale: Vec<String> = state
                .index
                .keys()
                .filter(|(s, id)| *s == scope && !listed.contains(id.as_str()))
                .map(|(_, id)| id.clone())
                .collect();
            for id in stale {
                state.remove(scope, &id, &mut touched);
            }

            for entry in entries {
                let key = self.group_key(scope, &entry.path);
                state.insert(key, entry.path.clone(), entry.id.clone(), &mut touched);
            }

            state.evaluate(touched)
        };

        debug!(
            "Reconciled {} objects in {}: {} new duplicate groups",
            entries.len(),
            scope,
            events.len()
        );
        self.publish(&events);
        events
    }

    /// Scan one scope of a backend and reconcile with the result.
    pub async fn scan_backend(
        &self,
        backend: &dyn StorageBackend,
        scope: Scope,
    ) -> Result<Vec<DuplicateEvent>> {
        let entries = backend.scan(scope).await.map_err(Error::from)?;
        Ok(self.reconcile(scope, &entries))
    }

    /// Groups currently holding more than one object.
    pub fn duplicates(&self) -> Vec<DuplicateEvent> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut current: Vec<DuplicateEvent> = state
            .groups
            .iter()
            .filter(|(_, group)| group.members.len() >= 2)
            .map(|((scope, _), group)| group.event(*scope))
            .collect();
        current.sort_by(|a, b| (a.scope, &a.path).cmp(&(b.scope, &b.path)));
        current
    }

    /// Forget every tracked object.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Groups::default();
    }

    fn publish(&self, events: &[DuplicateEvent]) {
        for event in events {
            info!(
                "Duplicate name {}:{} ({} objects)",
                event.scope,
                event.path,
                event.ids.len()
            );
            self.subscribers.publish(event);
        }
    }
}
