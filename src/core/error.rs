use crate::core::ResourcePath;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Transaction '{0}' not found or expired")]
    TransactionNotFound(String),

    #[error("No version of '{path}' as of {at}")]
    MementoNotFound { path: ResourcePath, at: DateTime<Utc> },

    #[error("Resource '{0}' not found")]
    ResourceNotFound(ResourcePath),

    #[error("Resource '{0}' is not versioned")]
    NotVersioned(ResourcePath),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Illegal state transition: {0}")]
    IllegalStateTransition(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl KernelError {
    /// True for every "no such thing" outcome: unknown transaction, resource,
    /// timemap or memento.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KernelError::TransactionNotFound(_)
                | KernelError::MementoNotFound { .. }
                | KernelError::ResourceNotFound(_)
                | KernelError::NotVersioned(_)
        )
    }

    /// Only a rejected save/revert leaves the unit of work usable for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KernelError::PersistenceFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;
