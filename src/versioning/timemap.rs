use super::Memento;
use crate::core::types::TIMEMAP_SEGMENT;
use crate::core::{KernelError, Resource, ResourcePath, Result};
use crate::storage::{MementoIndex, Store};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// History of one original resource.
///
/// Holds only the original's path, never the resource itself; the live
/// resource is looked up in the store on demand.
#[derive(Clone)]
pub struct TimeMap {
    original: ResourcePath,
    store: Arc<dyn Store>,
}

impl fmt::Debug for TimeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeMap")
            .field("original", &self.original)
            .finish()
    }
}

impl TimeMap {
    pub(crate) fn new(original: ResourcePath, store: Arc<dyn Store>) -> Self {
        Self { original, store }
    }

    /// Address of the time map itself, `<original>/fcr:versions`.
    pub fn path(&self) -> ResourcePath {
        self.original.child(TIMEMAP_SEGMENT)
    }

    pub fn original_path(&self) -> &ResourcePath {
        &self.original
    }

    /// The live, current state of the original resource.
    pub async fn get_original_resource(&self) -> Result<Resource> {
        self.store
            .get_resource(&self.original)
            .await?
            .ok_or_else(|| KernelError::ResourceNotFound(self.original.clone()))
    }

    /// Memento captured at exactly `at`.
    pub async fn find_memento(&self, at: DateTime<Utc>) -> Result<Arc<Memento>> {
        let index = self.store.mementos(&self.original).await?;
        index
            .get(&at)
            .cloned()
            .ok_or_else(|| self.not_found(at))
    }

    /// Latest memento captured at or before `at`.
    pub async fn find_nearest_before(&self, at: DateTime<Utc>) -> Result<Arc<Memento>> {
        let index = self.store.mementos(&self.original).await?;
        index
            .get_prev(&at)
            .map(|(_, memento)| Arc::clone(memento))
            .ok_or_else(|| self.not_found(at))
    }

    /// All mementos, oldest first, as of now.
    pub async fn list_mementos(&self) -> Result<MementoList> {
        let index = self.store.mementos(&self.original).await?;
        Ok(MementoList { index })
    }

    fn not_found(&self, at: DateTime<Utc>) -> KernelError {
        KernelError::MementoNotFound {
            path: self.original.clone(),
            at,
        }
    }
}

/// Frozen, ordered view of a time map's mementos.
///
/// Later captures do not show up in an existing list. Iterate as many times
/// as needed; each [`iter`](Self::iter) starts over from the oldest memento.
#[derive(Debug, Clone, Default)]
pub struct MementoList {
    index: MementoIndex,
}

impl MementoList {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Memento>> + '_ {
        self.index.values()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.index.keys().copied()
    }

    pub fn first(&self) -> Option<&Arc<Memento>> {
        self.index.get_min().map(|(_, memento)| memento)
    }

    pub fn last(&self) -> Option<&Arc<Memento>> {
        self.index.get_max().map(|(_, memento)| memento)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl<'a> IntoIterator for &'a MementoList {
    type Item = &'a Arc<Memento>;
    type IntoIter = Box<dyn Iterator<Item = &'a Arc<Memento>> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.index.values())
    }
}
