use crate::config::{KernelConfig, TimeoutPolicy};
use crate::core::{Clock, KernelError, Resource, ResourcePath, Result, SystemClock};
use crate::storage::{MemoryStore, Store};
use crate::transaction::{
    Cadence, CommitListener, CommitReceipt, Reaper, TransactionHandle, TransactionId,
    TransactionInfo, TransactionRegistry,
};
use crate::versioning::{TimeMap, VersionService};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Transactions and version history over one store.
///
/// This is what outer layers (HTTP, CLI) talk to. Transaction operations
/// report an unknown or expired id as `TransactionNotFound`; version lookups
/// report a missing version as `MementoNotFound`.
pub struct Repository {
    store: Arc<dyn Store>,
    config: KernelConfig,
    registry: Arc<TransactionRegistry>,
    versions: Arc<VersionService>,
    reaper: Option<Reaper>,
}

impl Repository {
    /// Build a repository and start its reaper. Needs a tokio runtime.
    pub async fn open(store: Arc<dyn Store>, config: KernelConfig) -> Result<Self> {
        let mut repository = Self::with_clock(store, config, Arc::new(SystemClock))?;
        repository.start_reaper()?;
        Ok(repository)
    }

    /// In-memory repository with configuration from the environment.
    pub async fn in_memory() -> Result<Self> {
        Self::open(Arc::new(MemoryStore::new()), KernelConfig::from_env()?).await
    }

    /// Build a repository without a running reaper.
    pub fn with_clock(
        store: Arc<dyn Store>,
        config: KernelConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(KernelError::ConfigError)?;

        let policy = TimeoutPolicy::new(config.timeout);
        let versions = Arc::new(VersionService::new(Arc::clone(&store)));
        let registry = Arc::new(
            TransactionRegistry::new(Arc::clone(&store), clock, policy)
                .with_listener(Arc::clone(&versions) as Arc<dyn CommitListener>),
        );

        Ok(Self {
            store,
            config,
            registry,
            versions,
            reaper: None,
        })
    }

    /// Start sweeping expired transactions. No-op if already running.
    ///
    /// Without a configured interval the reaper sweeps every half timeout,
    /// following live timeout changes.
    pub fn start_reaper(&mut self) -> Result<()> {
        if self.reaper.is_none() {
            let cadence = match self.config.reaper_interval {
                Some(interval) => Cadence::Every(interval),
                None => Cadence::HalfTimeout,
            };
            self.reaper = Some(Reaper::spawn(Arc::clone(&self.registry), cadence)?);
        }
        Ok(())
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Live timeout setting; changes apply to the next begin/touch.
    pub fn timeout_policy(&self) -> &TimeoutPolicy {
        self.registry.policy()
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    pub async fn begin_transaction(&self) -> Result<TransactionId> {
        self.registry.begin().await
    }

    /// Handle for working inside a transaction. Renews its expiry.
    pub async fn transaction(&self, id: TransactionId) -> Result<TransactionHandle> {
        self.registry.touch(id).await?;
        self.registry.get(id).await
    }

    pub async fn transaction_info(&self, id: TransactionId) -> Result<TransactionInfo> {
        self.registry.info(id).await
    }

    /// Commit, then capture mementos of every versioned resource it touched.
    ///
    /// The commit stands even if capturing fails; that failure is logged and
    /// returned.
    pub async fn commit(&self, id: TransactionId) -> Result<CommitReceipt> {
        self.registry.commit(id).await
    }

    pub async fn rollback(&self, id: TransactionId) -> Result<()> {
        self.registry.rollback(id).await
    }

    pub async fn touch(&self, id: TransactionId) -> Result<DateTime<Utc>> {
        self.registry.touch(id).await
    }

    /// Committed state of a resource.
    pub async fn get_resource(&self, path: &ResourcePath) -> Result<Resource> {
        self.store
            .get_resource(path)
            .await?
            .ok_or_else(|| KernelError::ResourceNotFound(path.clone()))
    }

    pub async fn enable_versioning(&self, path: &ResourcePath) -> Result<TimeMap> {
        self.versions.enable_versioning(path).await
    }

    pub async fn get_time_map(&self, path: &ResourcePath) -> Result<TimeMap> {
        self.versions.time_map(path).await
    }

    /// Stop the reaper. Live transactions are left as they are.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(reaper) = self.reaper.take() {
            reaper.stop().await?;
        }
        Ok(())
    }
}
