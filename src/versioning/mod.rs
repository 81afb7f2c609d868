// ============================================================================
// Versioning Module
// ============================================================================
//
// Mementos are immutable snapshots captured when a commit touches an enrolled
// resource. A time map indexes them by timestamp and points back to the live
// original by path only.
//
// ============================================================================

pub mod memento;
pub mod service;
pub mod timemap;

pub use memento::Memento;
pub use service::VersionService;
pub use timemap::{MementoList, TimeMap};
