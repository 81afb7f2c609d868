pub mod engine;
pub mod memory;

pub use engine::{MementoIndex, SavedChanges, Store, StoreSession};
pub use memory::{MemorySession, MemoryStore};
