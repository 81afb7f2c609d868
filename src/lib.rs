// ============================================================================
// repokernel Library
// ============================================================================

//! Transaction lifecycle and resource versioning for a resource repository.
//!
//! A [`Repository`] wraps a [`Store`]: callers group mutations into
//! transactions that are committed or rolled back, and abandoned ones are
//! rolled back by a background reaper once idle past the configured timeout.
//! Resources enrolled for versioning get an immutable memento on every
//! commit that touches them, queryable through their [`TimeMap`].
//!
//! # Examples
//!
//! ```
//! use repokernel::{Repository, Resource, ResourcePath};
//!
//! # #[tokio::main]
//! # async fn main() -> repokernel::Result<()> {
//! let repo = Repository::in_memory().await?;
//! let path = ResourcePath::parse("/a")?;
//! repo.enable_versioning(&path).await?;
//!
//! let tx = repo.begin_transaction().await?;
//! repo.transaction(tx)
//!     .await?
//!     .lock()
//!     .await
//!     .put_resource(Resource::container(path.clone()).with_property("title", "first"))
//!     .await?;
//! let receipt = repo.commit(tx).await?;
//!
//! let history = repo.get_time_map(&path).await?;
//! let memento = history.find_memento(receipt.committed_at).await?;
//! assert_eq!(memento.resource().property("title"), Some("first"));
//! # repo.shutdown().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod facade;
pub mod prelude;
pub mod storage;
pub mod transaction;
pub mod versioning;

pub use crate::config::{KernelConfig, TimeoutPolicy};
pub use crate::core::{
    BinaryContent, Clock, KernelError, ManualClock, Resource, ResourceKind, ResourcePath, Result,
    SystemClock,
};
pub use crate::facade::Repository;
pub use crate::storage::{MemoryStore, SavedChanges, Store, StoreSession};
pub use crate::transaction::{
    Cadence, CommitListener, CommitReceipt, ReapReport, TransactionHandle, TransactionId,
    TransactionInfo, TransactionRegistry, TransactionState, UnitOfWork,
};
pub use crate::versioning::{Memento, MementoList, TimeMap, VersionService};
