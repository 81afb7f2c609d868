// ============================================================================
// Unit of Work
// ============================================================================
//
// A transaction wraps exactly one store session. The session is released on a
// single path (`release`) shared by commit, rollback and expire.
//
// DIRTY is never stored: it is derived from the session on every query.
//
// ============================================================================

use crate::config::TimeoutPolicy;
use crate::core::{Clock, KernelError, Resource, ResourcePath, Result};
use crate::storage::{SavedChanges, StoreSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};
use uuid::Uuid;

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new random (v4) transaction ID
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(TransactionId)
            .map_err(|_| KernelError::TransactionNotFound(raw.to_string()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// NEW --(mutation)--> DIRTY --(commit)--> COMMITTED
/// NEW/DIRTY --(rollback | idle timeout)--> ROLLED_BACK
/// ```
///
/// `Dirty` is only ever reported, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    New,
    Dirty,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::New => write!(f, "NEW"),
            TransactionState::Dirty => write!(f, "DIRTY"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub transaction: TransactionId,
    pub committed_at: DateTime<Utc>,
    pub changes: SavedChanges,
}

/// A transaction over one exclusively owned store session.
pub struct UnitOfWork {
    id: TransactionId,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// New, Committed or RolledBack.
    state: TransactionState,
    /// `None` once released.
    session: Option<Box<dyn StoreSession>>,
    clock: Arc<dyn Clock>,
    policy: TimeoutPolicy,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("state", &self.state)
            .field("released", &self.session.is_none())
            .finish()
    }
}

impl UnitOfWork {
    pub fn begin(
        session: Box<dyn StoreSession>,
        clock: Arc<dyn Clock>,
        policy: TimeoutPolicy,
    ) -> Self {
        let now = clock.now();
        Self {
            id: TransactionId::new(),
            created_at: now,
            expires_at: policy.expiry_from(now),
            state: TransactionState::New,
            session: Some(session),
            clock,
            policy,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_released(&self) -> bool {
        self.session.is_none()
    }

    /// Whether the terminal state has been reached. Unlike [`state`](Self::state)
    /// this never touches the session.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Effective state: `Dirty` whenever the session reports pending changes.
    ///
    /// Terminal states are returned as is. An expired but non-terminal unit
    /// has no session left to ask and fails with `StoreUnavailable`.
    pub async fn state(&self) -> Result<TransactionState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        let session = self.session.as_ref().ok_or_else(|| self.released_error())?;
        if session.has_pending_changes().await? {
            return Ok(TransactionState::Dirty);
        }
        Ok(self.state)
    }

    /// Save everything pending, mark COMMITTED and release the session.
    ///
    /// The receipt carries the store's commit stamp. A rejected save leaves
    /// the unit untouched and still holding its session. Callers outside the
    /// crate commit through the registry, which also notifies its listeners.
    pub(crate) async fn commit(&mut self) -> Result<CommitReceipt> {
        let now = self.clock.now();
        let session = self.open_session_mut("commit")?;
        let changes = session.save(now).await?;

        let committed_at = changes.committed_at();
        self.state = TransactionState::Committed;
        self.release().await;

        event!(Level::DEBUG, transaction = %self.id, changed = changes.len(), "transaction committed");
        Ok(CommitReceipt {
            transaction: self.id,
            committed_at,
            changes,
        })
    }

    /// Discard everything pending, mark ROLLED_BACK and release the session.
    pub async fn rollback(&mut self) -> Result<()> {
        let session = self.open_session_mut("roll back")?;
        session.revert().await?;

        self.state = TransactionState::RolledBack;
        self.release().await;

        event!(Level::DEBUG, transaction = %self.id, "transaction rolled back");
        Ok(())
    }

    /// Release the session and make the unit immediately due for eviction.
    /// The state is left as is.
    pub async fn expire(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Err(self.released_error());
        }
        self.release().await;
        Ok(())
    }

    /// Push the expiry out by the timeout configured right now.
    pub fn touch(&mut self) -> Result<DateTime<Utc>> {
        self.ensure_active("touch")?;
        self.expires_at = self.policy.expiry_from(self.clock.now());
        Ok(self.expires_at)
    }

    pub async fn get_resource(&mut self, path: &ResourcePath) -> Result<Option<Resource>> {
        self.touch()?;
        self.open_session_mut("read")?.get_resource(path).await
    }

    pub async fn put_resource(&mut self, resource: Resource) -> Result<()> {
        self.touch()?;
        self.open_session_mut("write")?.put_resource(resource).await
    }

    pub async fn create_binary(&mut self, binary: Resource) -> Result<()> {
        self.touch()?;
        self.open_session_mut("write")?.create_binary(binary).await
    }

    pub async fn delete_resource(&mut self, path: &ResourcePath) -> Result<()> {
        self.touch()?;
        self.open_session_mut("delete")?.delete_resource(path).await
    }

    /// The only place a session is given up. Close failures are logged: the
    /// handle is gone either way.
    async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.close().await {
                event!(Level::WARN, transaction = %self.id, error = %err, "session close failed");
            }
        }
        self.expires_at = self.clock.now();
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if self.state.is_terminal() {
            return Err(KernelError::IllegalStateTransition(format!(
                "cannot {}: transaction {} is already {}",
                action, self.id, self.state
            )));
        }
        if self.session.is_none() {
            return Err(self.released_error());
        }
        Ok(())
    }

    fn open_session_mut(&mut self, action: &str) -> Result<&mut Box<dyn StoreSession>> {
        self.ensure_active(action)?;
        let id = self.id;
        self.session.as_mut().ok_or_else(|| {
            KernelError::StoreUnavailable(format!("transaction {} has no session", id))
        })
    }

    fn released_error(&self) -> KernelError {
        KernelError::StoreUnavailable(format!(
            "session of transaction {} has been released",
            self.id
        ))
    }
}
