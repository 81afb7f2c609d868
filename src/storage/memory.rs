use super::{MementoIndex, SavedChanges, Store, StoreSession};
use crate::core::{KernelError, Resource, ResourcePath, Result};
use crate::versioning::Memento;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A committed resource and the version stamp of the save that wrote it.
#[derive(Debug, Clone)]
struct StoredResource {
    resource: Resource,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    resources: HashMap<ResourcePath, StoredResource>,
    enrolled: HashSet<ResourcePath>,
    mementos: HashMap<ResourcePath, MementoIndex>,
    next_version: u64,
    last_commit: Option<DateTime<Utc>>,
}

impl StoreState {
    fn version_of(&self, path: &ResourcePath) -> Option<u64> {
        self.resources.get(path).map(|stored| stored.version)
    }

    fn resource(&self, path: &ResourcePath) -> Option<Resource> {
        self.resources.get(path).map(|stored| stored.resource.clone())
    }

    /// `at`, or one nanosecond past the previous commit when `at` is not later.
    fn stamp_commit(&mut self, at: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.last_commit {
            Some(last) if last >= at => last + chrono::Duration::nanoseconds(1),
            _ => at,
        };
        self.last_commit = Some(stamp);
        stamp
    }
}

/// In-memory store.
///
/// Sessions keep their writes in a private overlay. `save` applies the overlay
/// under the store's write lock, and fails without applying anything if any
/// touched path was changed by another session since this one first saw it.
/// Commit stamps are assigned under the same lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    next_session_id: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed resources.
    pub async fn resource_count(&self) -> usize {
        self.state.read().await.resources.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>> {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MemorySession {
            id,
            state: Arc::clone(&self.state),
            pending: BTreeMap::new(),
            closed: false,
        }))
    }

    async fn get_resource(&self, path: &ResourcePath) -> Result<Option<Resource>> {
        let state = self.state.read().await;
        Ok(state.resources.get(path).map(|stored| stored.resource.clone()))
    }

    async fn enroll(&self, original: &ResourcePath) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.enrolled.insert(original.clone()))
    }

    async fn is_enrolled(&self, original: &ResourcePath) -> Result<bool> {
        Ok(self.state.read().await.enrolled.contains(original))
    }

    async fn put_memento(&self, memento: Arc<Memento>) -> Result<()> {
        let mut state = self.state.write().await;
        let index = state
            .mementos
            .entry(memento.original().clone())
            .or_default();

        if index.contains_key(&memento.timestamp()) {
            return Err(KernelError::PersistenceFailure(format!(
                "memento of '{}' at {} already exists",
                memento.original(),
                memento.timestamp()
            )));
        }

        index.insert(memento.timestamp(), memento);
        Ok(())
    }

    async fn mementos(&self, original: &ResourcePath) -> Result<MementoIndex> {
        let state = self.state.read().await;
        Ok(state.mementos.get(original).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Put(Resource),
    Delete,
}

#[derive(Debug, Clone)]
struct PendingChange {
    /// Committed version when this session first touched the path.
    base_version: Option<u64>,
    write: PendingWrite,
}

/// Session over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    state: Arc<RwLock<StoreState>>,
    pending: BTreeMap<ResourcePath, PendingChange>,
    closed: bool,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(KernelError::StoreUnavailable(format!(
                "session {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    async fn stage(&mut self, path: ResourcePath, write: PendingWrite) {
        if let Some(change) = self.pending.get_mut(&path) {
            change.write = write;
            return;
        }

        let base_version = self.state.read().await.version_of(&path);
        self.pending.insert(
            path,
            PendingChange {
                base_version,
                write,
            },
        );
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn has_pending_changes(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(!self.pending.is_empty())
    }

    async fn save(&mut self, at: DateTime<Utc>) -> Result<SavedChanges> {
        self.ensure_open()?;

        let mut state = self.state.write().await;

        for (path, change) in &self.pending {
            if state.version_of(path) != change.base_version {
                return Err(KernelError::PersistenceFailure(format!(
                    "conflicting concurrent write to '{}'",
                    path
                )));
            }
        }

        state.next_version += 1;
        let version = state.next_version;
        let mut saved = SavedChanges::new(state.stamp_commit(at));

        for (path, change) in std::mem::take(&mut self.pending) {
            match change.write {
                PendingWrite::Put(resource) => {
                    state.resources.insert(
                        path.clone(),
                        StoredResource {
                            resource: resource.clone(),
                            version,
                        },
                    );
                    saved.record(path, Some(resource));
                }
                PendingWrite::Delete => {
                    state.resources.remove(&path);
                    saved.record(path, None);
                }
            }
        }

        let related: Vec<ResourcePath> = saved
            .paths()
            .flat_map(|path| {
                let original = path.original();
                [original.description_path(), original]
            })
            .collect();
        for path in related {
            let current = state.resource(&path);
            saved.record_context(path, current);
        }

        Ok(saved)
    }

    async fn revert(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.pending.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.pending.clear();
        self.closed = true;
        Ok(())
    }

    async fn get_resource(&self, path: &ResourcePath) -> Result<Option<Resource>> {
        self.ensure_open()?;

        if let Some(change) = self.pending.get(path) {
            return Ok(match &change.write {
                PendingWrite::Put(resource) => Some(resource.clone()),
                PendingWrite::Delete => None,
            });
        }

        Ok(self.state.read().await.resource(path))
    }

    async fn put_resource(&mut self, resource: Resource) -> Result<()> {
        self.ensure_open()?;
        let path = resource.path().clone();
        self.stage(path, PendingWrite::Put(resource)).await;
        Ok(())
    }

    async fn delete_resource(&mut self, path: &ResourcePath) -> Result<()> {
        self.ensure_open()?;

        let existing = self
            .get_resource(path)
            .await?
            .ok_or_else(|| KernelError::ResourceNotFound(path.clone()))?;

        if existing.is_binary() {
            let description = path.description_path();
            if self.get_resource(&description).await?.is_some() {
                self.stage(description, PendingWrite::Delete).await;
            }
        }

        self.stage(path.clone(), PendingWrite::Delete).await;
        Ok(())
    }
}
