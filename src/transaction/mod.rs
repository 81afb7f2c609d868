// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Session-scoped units of work with commit/rollback, and a registry that
// reclaims abandoned ones in the background.
//
// ============================================================================

pub mod reaper;
pub mod registry;
pub mod state;

pub use reaper::{Cadence, Reaper};
pub use registry::{
    CommitListener, ReapReport, TransactionHandle, TransactionInfo, TransactionRegistry,
};
pub use state::{CommitReceipt, TransactionId, TransactionState, UnitOfWork};
