//! Shared helpers for integration tests
//!
//! `FlakyStore` wraps a `MemoryStore` and can make every session's save,
//! revert or close fail on demand, or hold one close until released.
#![allow(dead_code)]

use async_trait::async_trait;
use repokernel::{
    KernelConfig, KernelError, ManualClock, Memento, MemoryStore, Repository, Resource,
    ResourcePath, Result, SavedChanges, Store, StoreSession,
};
use repokernel::storage::MementoIndex;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

pub fn path(raw: &str) -> ResourcePath {
    ResourcePath::parse(raw).unwrap()
}

/// Repository on a manual clock with the given timeout, no reaper running.
pub fn manual_repository(timeout: Duration) -> (Repository, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let repo = Repository::with_clock(
        Arc::new(MemoryStore::new()),
        KernelConfig::new().timeout(timeout),
        clock.clone(),
    )
    .unwrap();
    (repo, clock)
}

#[derive(Debug, Default)]
pub struct Faults {
    pub fail_save: AtomicBool,
    /// Save fails as if the session were gone.
    pub lose_session_on_save: AtomicBool,
    pub fail_revert: AtomicBool,
    pub fail_close: AtomicBool,
    /// The next close blocks until `release_close` is notified.
    pub hold_next_close: AtomicBool,
    pub close_held: Notify,
    pub release_close: Notify,
    pub saves: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub faults: Arc<Faults>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(FlakySession {
            inner: self.inner.open_session().await?,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn get_resource(&self, path: &ResourcePath) -> Result<Option<Resource>> {
        self.inner.get_resource(path).await
    }

    async fn enroll(&self, original: &ResourcePath) -> Result<bool> {
        self.inner.enroll(original).await
    }

    async fn is_enrolled(&self, original: &ResourcePath) -> Result<bool> {
        self.inner.is_enrolled(original).await
    }

    async fn put_memento(&self, memento: Arc<Memento>) -> Result<()> {
        self.inner.put_memento(memento).await
    }

    async fn mementos(&self, original: &ResourcePath) -> Result<MementoIndex> {
        self.inner.mementos(original).await
    }
}

pub struct FlakySession {
    inner: Box<dyn StoreSession>,
    faults: Arc<Faults>,
}

#[async_trait]
impl StoreSession for FlakySession {
    async fn has_pending_changes(&self) -> Result<bool> {
        self.inner.has_pending_changes().await
    }

    async fn save(&mut self, at: DateTime<Utc>) -> Result<SavedChanges> {
        if self.faults.fail_save.load(Ordering::SeqCst) {
            return Err(KernelError::PersistenceFailure("injected save failure".into()));
        }
        if self.faults.lose_session_on_save.load(Ordering::SeqCst) {
            return Err(KernelError::StoreUnavailable("session lost".into()));
        }
        let saved = self.inner.save(at).await?;
        self.faults.saves.fetch_add(1, Ordering::SeqCst);
        Ok(saved)
    }

    async fn revert(&mut self) -> Result<()> {
        if self.faults.fail_revert.load(Ordering::SeqCst) {
            return Err(KernelError::PersistenceFailure("injected revert failure".into()));
        }
        self.inner.revert().await
    }

    async fn close(&mut self) -> Result<()> {
        if self.faults.fail_close.load(Ordering::SeqCst) {
            return Err(KernelError::StoreUnavailable("injected close failure".into()));
        }
        if self.faults.hold_next_close.swap(false, Ordering::SeqCst) {
            self.faults.close_held.notify_one();
            self.faults.release_close.notified().await;
        }
        self.inner.close().await
    }

    async fn get_resource(&self, path: &ResourcePath) -> Result<Option<Resource>> {
        self.inner.get_resource(path).await
    }

    async fn put_resource(&mut self, resource: Resource) -> Result<()> {
        self.inner.put_resource(resource).await
    }

    async fn delete_resource(&mut self, path: &ResourcePath) -> Result<()> {
        self.inner.delete_resource(path).await
    }
}
