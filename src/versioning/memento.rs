use crate::core::{BinaryContent, Resource, ResourcePath};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a resource as persisted by one commit.
///
/// For a binary the snapshot also carries its description as of the same
/// instant. The content itself is shared with the live resource until the
/// live resource gets new content; it is never copied or changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memento {
    original: ResourcePath,
    timestamp: DateTime<Utc>,
    resource: Resource,
    description: Option<Resource>,
}

impl Memento {
    pub(crate) fn capture(
        timestamp: DateTime<Utc>,
        resource: Resource,
        description: Option<Resource>,
    ) -> Self {
        Self {
            original: resource.path().clone(),
            timestamp,
            resource,
            description,
        }
    }

    /// Path of the live resource this memento belongs to.
    pub fn original(&self) -> &ResourcePath {
        &self.original
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The resource's state at [`timestamp`](Self::timestamp).
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn content(&self) -> Option<&BinaryContent> {
        self.resource.content()
    }

    /// For binaries, the description's state at the same instant.
    pub fn description(&self) -> Option<&Resource> {
        self.description.as_ref()
    }
}
