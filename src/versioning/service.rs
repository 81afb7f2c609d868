use super::{Memento, TimeMap};
use crate::core::{KernelError, Resource, ResourcePath, Result};
use crate::storage::Store;
use crate::transaction::{CommitListener, CommitReceipt};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{Level, event};

/// Enrollment and memento capture.
///
/// Registered as a [`CommitListener`], so every commit through the registry
/// is captured.
pub struct VersionService {
    store: Arc<dyn Store>,
}

impl VersionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Enroll the resource at `path` (a description enrolls its binary) and
    /// return its time map. Enrolling twice returns the same time map.
    ///
    /// The resource does not have to exist yet: enrolling inside the
    /// transaction that creates it captures that commit too.
    pub async fn enable_versioning(&self, path: &ResourcePath) -> Result<TimeMap> {
        let original = path.original();
        if self.store.enroll(&original).await? {
            event!(Level::DEBUG, resource = %original, "versioning enabled");
        }
        Ok(TimeMap::new(original, Arc::clone(&self.store)))
    }

    pub async fn is_versioned(&self, path: &ResourcePath) -> Result<bool> {
        self.store.is_enrolled(&path.original()).await
    }

    /// Time map of the resource at `path`. For a description this is the
    /// time map of the binary it describes.
    pub async fn time_map(&self, path: &ResourcePath) -> Result<TimeMap> {
        let original = path.original();
        if !self.store.is_enrolled(&original).await? {
            return Err(KernelError::NotVersioned(path.clone()));
        }
        Ok(TimeMap::new(original, Arc::clone(&self.store)))
    }

    /// Record a memento for every enrolled resource the commit touched.
    ///
    /// Mementos are keyed by the store's commit stamp, which is unique and
    /// follows save order, so captures may land in any order. Snapshots come
    /// from what the save recorded; a store that records no state for a
    /// binary's description gets it read from committed state instead.
    /// Resources deleted by the commit get no memento.
    pub async fn capture(&self, receipt: &CommitReceipt) -> Result<Vec<Arc<Memento>>> {
        let originals: BTreeSet<ResourcePath> =
            receipt.changes.paths().map(ResourcePath::original).collect();
        let mut captured = Vec::new();

        for original in originals {
            if !self.store.is_enrolled(&original).await? {
                continue;
            }

            let Some(resource) = self.state_after(receipt, &original).await? else {
                continue;
            };
            let description = if resource.is_binary() {
                self.state_after(receipt, &original.description_path())
                    .await?
            } else {
                None
            };

            let memento = Arc::new(Memento::capture(
                receipt.committed_at,
                resource,
                description,
            ));
            self.store.put_memento(Arc::clone(&memento)).await?;

            event!(
                Level::DEBUG,
                resource = %original,
                transaction = %receipt.transaction,
                timestamp = %receipt.committed_at,
                "memento captured"
            );
            captured.push(memento);
        }

        Ok(captured)
    }

    async fn state_after(
        &self,
        receipt: &CommitReceipt,
        path: &ResourcePath,
    ) -> Result<Option<Resource>> {
        match receipt.changes.state_after(path) {
            Some(state) => Ok(state.clone()),
            None => self.store.get_resource(path).await,
        }
    }
}

#[async_trait]
impl CommitListener for VersionService {
    async fn committed(&self, receipt: &CommitReceipt) -> Result<()> {
        self.capture(receipt).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SavedChanges};
    use crate::transaction::TransactionId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_capture_uses_recorded_description() {
        let store = Arc::new(MemoryStore::new());
        let service = VersionService::new(store.clone());
        let binary = ResourcePath::parse("/b").unwrap();
        service.enable_versioning(&binary).await.unwrap();

        let mut changes = SavedChanges::new(Utc::now());
        changes.record(
            binary.clone(),
            Some(Resource::binary(
                binary.clone(),
                crate::core::BinaryContent::new("x", "text/plain"),
            )),
        );
        changes.record_context(
            binary.description_path(),
            Some(Resource::description_of(&binary).with_property("label", "then")),
        );
        let receipt = CommitReceipt {
            transaction: TransactionId::new(),
            committed_at: changes.committed_at(),
            changes,
        };

        let captured = service.capture(&receipt).await.unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].timestamp(), receipt.committed_at);
        assert_eq!(
            captured[0].description().unwrap().property("label"),
            Some("then")
        );
    }

    #[tokio::test]
    async fn test_enrollment_is_idempotent_and_follows_descriptions() {
        let store = Arc::new(MemoryStore::new());
        let service = VersionService::new(store);
        let binary = ResourcePath::parse("/b").unwrap();

        let first = service.enable_versioning(&binary).await.unwrap();
        let again = service
            .enable_versioning(&binary.description_path())
            .await
            .unwrap();

        assert_eq!(first.original_path(), again.original_path());
        assert!(service.is_versioned(&binary).await.unwrap());

        let description_map = service.time_map(&binary.description_path()).await.unwrap();
        assert_eq!(description_map.original_path(), &binary);
        assert_eq!(description_map.path().as_str(), "/b/fcr:versions");
    }

    #[tokio::test]
    async fn test_time_map_requires_enrollment() {
        let service = VersionService::new(Arc::new(MemoryStore::new()));
        let err = service
            .time_map(&ResourcePath::parse("/plain").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::NotVersioned(_)));
    }
}
