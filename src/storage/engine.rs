use crate::core::{KernelError, Resource, ResourcePath, Result};
use crate::versioning::Memento;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered memento index of one original resource.
///
/// A persistent map: cloning it is O(1) and the clone never observes later
/// inserts, so readers hold a stable view without locking.
pub type MementoIndex = im::OrdMap<DateTime<Utc>, Arc<Memento>>;

/// Store trait - the persistence collaborator the kernel wraps.
///
/// Sessions carry uncommitted work; everything on the store itself reads or
/// writes committed state.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a fresh session with no pending changes.
    async fn open_session(&self) -> Result<Box<dyn StoreSession>>;

    /// Committed state of a resource.
    async fn get_resource(&self, path: &ResourcePath) -> Result<Option<Resource>>;

    /// Enroll a resource for versioning. Returns false if it already was.
    async fn enroll(&self, original: &ResourcePath) -> Result<bool>;

    async fn is_enrolled(&self, original: &ResourcePath) -> Result<bool>;

    /// Persist a memento under `(original, timestamp)`. An occupied key is a
    /// `PersistenceFailure`; mementos are never overwritten.
    async fn put_memento(&self, memento: Arc<Memento>) -> Result<()>;

    /// Current memento index of `original` (empty if it has none).
    async fn mementos(&self, original: &ResourcePath) -> Result<MementoIndex>;
}

/// A unit of uncommitted work against the store.
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// Whether anything has been written since the last save/revert.
    async fn has_pending_changes(&self) -> Result<bool>;

    /// Apply all pending changes atomically and stamp the commit.
    ///
    /// The stamp is `at`, or one nanosecond past the store's previous stamp
    /// when `at` is not later, so stamps are unique and follow save order.
    /// The result also records, as of this save, the committed state of each
    /// touched path's original and of that original's description.
    async fn save(&mut self, at: DateTime<Utc>) -> Result<SavedChanges>;

    /// Discard all pending changes.
    async fn revert(&mut self) -> Result<()>;

    /// End the session. Calling anything afterwards, including `close`,
    /// fails with `StoreUnavailable`.
    async fn close(&mut self) -> Result<()>;

    /// Resource as seen by this session: pending changes over committed state.
    async fn get_resource(&self, path: &ResourcePath) -> Result<Option<Resource>>;

    async fn put_resource(&mut self, resource: Resource) -> Result<()>;

    async fn delete_resource(&mut self, path: &ResourcePath) -> Result<()>;

    /// Create or replace a binary, creating its description if missing.
    async fn create_binary(&mut self, binary: Resource) -> Result<()> {
        if !binary.is_binary() {
            return Err(KernelError::IllegalStateTransition(format!(
                "'{}' is a {}, not a binary",
                binary.path(),
                binary.kind()
            )));
        }

        let description_path = binary.path().description_path();
        let needs_description = self.get_resource(&description_path).await?.is_none();
        let description = Resource::description_of(binary.path());

        self.put_resource(binary).await?;
        if needs_description {
            self.put_resource(description).await?;
        }
        Ok(())
    }
}

/// What a save wrote: each touched path and its state afterwards
/// (`None` = deleted), plus the state of related untouched paths read in the
/// same save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedChanges {
    committed_at: DateTime<Utc>,
    changes: BTreeMap<ResourcePath, Option<Resource>>,
    context: BTreeMap<ResourcePath, Option<Resource>>,
}

impl SavedChanges {
    pub fn new(committed_at: DateTime<Utc>) -> Self {
        Self {
            committed_at,
            changes: BTreeMap::new(),
            context: BTreeMap::new(),
        }
    }

    /// Store-assigned commit stamp.
    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn record(&mut self, path: ResourcePath, state: Option<Resource>) {
        self.context.remove(&path);
        self.changes.insert(path, state);
    }

    /// Record the committed state of a path this save did not write.
    pub fn record_context(&mut self, path: ResourcePath, state: Option<Resource>) {
        if !self.changes.contains_key(&path) {
            self.context.insert(path, state);
        }
    }

    /// State written by this save, if it wrote `path`.
    pub fn get(&self, path: &ResourcePath) -> Option<&Option<Resource>> {
        self.changes.get(path)
    }

    /// State of `path` right after this save, if the save wrote or recorded it.
    pub fn state_after(&self, path: &ResourcePath) -> Option<&Option<Resource>> {
        self.changes.get(path).or_else(|| self.context.get(path))
    }

    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.changes.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &ResourcePath> {
        self.changes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourcePath, &Option<Resource>)> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
