// ============================================================================
// Transaction Registry
// ============================================================================

use super::{CommitReceipt, TransactionId, TransactionState, UnitOfWork};
use crate::config::TimeoutPolicy;
use crate::core::{Clock, KernelError, Result};
use crate::storage::{Store, StoreSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{Instrument, Level, event, info_span};

/// Shared handle to one live unit of work.
///
/// Holding a handle does not keep the transaction registered; once it has been
/// committed, rolled back or reaped, the unit behind it is terminal or released.
#[derive(Clone)]
pub struct TransactionHandle {
    id: TransactionId,
    inner: Arc<Mutex<UnitOfWork>>,
}

impl TransactionHandle {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Exclusive access to the unit. Commit, rollback, touch and expire on the
    /// same transaction are serialized through this lock.
    pub async fn lock(&self) -> MutexGuard<'_, UnitOfWork> {
        self.inner.lock().await
    }
}

/// Told about every commit the registry performs, after the entry is removed.
///
/// An error does not undo the commit; it is logged and handed to the caller
/// of [`TransactionRegistry::commit`].
#[async_trait]
pub trait CommitListener: Send + Sync {
    async fn committed(&self, receipt: &CommitReceipt) -> Result<()>;
}

/// Serializable view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub state: TransactionState,
}

/// Outcome of one reaper sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Live entries looked at.
    pub scanned: usize,
    /// Expired entries rolled back cleanly.
    pub rolled_back: usize,
    /// Expired entries whose rollback failed and that were evicted anyway.
    pub forced: usize,
    /// Entries that were already terminal or released and were dropped.
    pub evicted_stale: usize,
    /// Entries in use by a caller during the sweep.
    pub skipped_busy: usize,
}

impl ReapReport {
    pub fn evicted(&self) -> usize {
        self.rolled_back + self.forced + self.evicted_stale
    }
}

/// id → unit of work, for every live transaction.
///
/// The map lock is only held to insert, look up or remove; each unit carries
/// its own lock.
pub struct TransactionRegistry {
    store: Arc<dyn Store>,
    transactions: RwLock<HashMap<TransactionId, Arc<Mutex<UnitOfWork>>>>,
    clock: Arc<dyn Clock>,
    policy: TimeoutPolicy,
    listeners: Vec<Arc<dyn CommitListener>>,
}

impl TransactionRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, policy: TimeoutPolicy) -> Self {
        Self {
            store,
            transactions: RwLock::new(HashMap::new()),
            clock,
            policy,
            listeners: Vec::new(),
        }
    }

    /// Add a listener run after every successful commit, in registration order.
    pub fn with_listener(mut self, listener: Arc<dyn CommitListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Open a store session and begin a transaction on it.
    pub async fn begin(&self) -> Result<TransactionId> {
        let session = self.store.open_session().await?;
        self.create(session).await
    }

    /// Begin a transaction over an already opened session.
    pub async fn create(&self, session: Box<dyn StoreSession>) -> Result<TransactionId> {
        let unit = UnitOfWork::begin(session, Arc::clone(&self.clock), self.policy.clone());
        let id = unit.id();
        let expires = unit.expires_at();

        let rejected = match self.transactions.write().await.entry(id) {
            Entry::Occupied(_) => Some(unit),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(unit)));
                None
            }
        };
        if let Some(mut unit) = rejected {
            let _ = unit.expire().await;
            return Err(KernelError::IllegalStateTransition(format!(
                "transaction id {} already in use",
                id
            )));
        }

        event!(Level::DEBUG, transaction = %id, expires = %expires, "transaction started");
        Ok(id)
    }

    pub async fn get(&self, id: TransactionId) -> Result<TransactionHandle> {
        let transactions = self.transactions.read().await;
        transactions
            .get(&id)
            .map(|inner| TransactionHandle {
                id,
                inner: Arc::clone(inner),
            })
            .ok_or_else(|| KernelError::TransactionNotFound(id.to_string()))
    }

    /// Snapshot of a transaction. A unit whose session can no longer report
    /// its state is evicted.
    pub async fn info(&self, id: TransactionId) -> Result<TransactionInfo> {
        let handle = self.get(id).await?;
        let mut unit = handle.lock().await;
        match unit.state().await {
            Ok(state) => Ok(TransactionInfo {
                id,
                created: unit.created_at(),
                expires: unit.expires_at(),
                state,
            }),
            Err(err) => {
                self.evict_if_unavailable(id, &mut unit, &err).await;
                Err(err)
            }
        }
    }

    /// Commit, unregister and notify listeners.
    ///
    /// A `PersistenceFailure` keeps the entry so the caller can retry or roll
    /// back; `StoreUnavailable` evicts it.
    pub async fn commit(&self, id: TransactionId) -> Result<CommitReceipt> {
        let span = info_span!("registry.commit", transaction = %id);
        async {
            let handle = self.get(id).await?;
            let mut unit = handle.lock().await;
            let receipt = match unit.commit().await {
                Ok(receipt) => receipt,
                Err(err) => {
                    event!(Level::ERROR, error = %err, "commit failed");
                    self.evict_if_unavailable(id, &mut unit, &err).await;
                    return Err(err);
                }
            };
            self.remove(id).await;
            drop(unit);

            for listener in &self.listeners {
                if let Err(err) = listener.committed(&receipt).await {
                    event!(Level::ERROR, error = %err, "commit listener failed");
                    return Err(err);
                }
            }
            Ok(receipt)
        }
        .instrument(span)
        .await
    }

    /// Roll back and unregister. A `PersistenceFailure` keeps the entry;
    /// `StoreUnavailable` evicts it.
    pub async fn rollback(&self, id: TransactionId) -> Result<()> {
        let span = info_span!("registry.rollback", transaction = %id);
        async {
            let handle = self.get(id).await?;
            let mut unit = handle.lock().await;
            match unit.rollback().await {
                Ok(()) => {
                    self.remove(id).await;
                    Ok(())
                }
                Err(err) => {
                    event!(Level::ERROR, error = %err, "rollback failed");
                    self.evict_if_unavailable(id, &mut unit, &err).await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Renew the expiry. `TransactionNotFound` means the transaction is gone,
    /// most likely reaped.
    pub async fn touch(&self, id: TransactionId) -> Result<DateTime<Utc>> {
        let handle = self.get(id).await?;
        let mut unit = handle.lock().await;
        match unit.touch() {
            Ok(expires) => Ok(expires),
            Err(err) => {
                self.evict_if_unavailable(id, &mut unit, &err).await;
                Err(err)
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<TransactionId> {
        self.transactions.read().await.keys().copied().collect()
    }

    /// One reaper sweep.
    ///
    /// Expired, non-terminal units are rolled back, never committed, and
    /// evicted. A unit whose rollback fails is released and evicted anyway.
    /// Units currently locked by a caller are left for the next sweep.
    pub async fn reap_expired(&self) -> ReapReport {
        let entries: Vec<(TransactionId, Arc<Mutex<UnitOfWork>>)> = {
            let transactions = self.transactions.read().await;
            transactions
                .iter()
                .map(|(id, unit)| (*id, Arc::clone(unit)))
                .collect()
        };

        let now = self.clock.now();
        let mut report = ReapReport {
            scanned: entries.len(),
            ..ReapReport::default()
        };

        for (id, entry) in entries {
            let Ok(mut unit) = entry.try_lock() else {
                report.skipped_busy += 1;
                continue;
            };

            if unit.is_terminal() || unit.is_released() {
                drop(unit);
                self.remove(id).await;
                report.evicted_stale += 1;
                continue;
            }

            if !unit.is_expired_at(now) {
                continue;
            }

            match unit.rollback().await {
                Ok(()) => {
                    event!(Level::INFO, transaction = %id, "expired transaction rolled back");
                    report.rolled_back += 1;
                }
                Err(err) => {
                    event!(
                        Level::WARN,
                        transaction = %id,
                        error = %err,
                        "expired transaction could not be rolled back, evicting"
                    );
                    if !unit.is_released() {
                        let _ = unit.expire().await;
                    }
                    report.forced += 1;
                }
            }
            drop(unit);
            self.remove(id).await;
        }

        event!(
            Level::DEBUG,
            scanned = report.scanned,
            evicted = report.evicted(),
            busy = report.skipped_busy,
            "reaper sweep finished"
        );
        report
    }

    async fn remove(&self, id: TransactionId) {
        self.transactions.write().await.remove(&id);
    }

    /// `StoreUnavailable` is fatal for a unit: release what is left of it and
    /// drop the entry. Other errors leave the entry alone.
    async fn evict_if_unavailable(
        &self,
        id: TransactionId,
        unit: &mut UnitOfWork,
        err: &KernelError,
    ) {
        if !matches!(err, KernelError::StoreUnavailable(_)) {
            return;
        }
        if !unit.is_released() {
            let _ = unit.expire().await;
        }
        self.remove(id).await;
        event!(Level::WARN, transaction = %id, error = %err, "store session unavailable, transaction evicted");
    }
}
