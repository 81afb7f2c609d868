pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{KernelError, Result};
pub use types::{BinaryContent, Resource, ResourceKind, ResourcePath};
