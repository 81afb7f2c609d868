//! Everything an outer layer needs to drive transactions and read history.

pub use crate::config::{KernelConfig, TimeoutPolicy};
pub use crate::core::{BinaryContent, KernelError, Resource, ResourceKind, ResourcePath, Result};
pub use crate::facade::Repository;
pub use crate::storage::{MemoryStore, Store, StoreSession};
pub use crate::transaction::{CommitReceipt, TransactionId, TransactionInfo, TransactionState};
pub use crate::versioning::{Memento, MementoList, TimeMap};
