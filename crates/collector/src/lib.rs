pub mod config;
pub mod lock;
pub mod pipeline;
pub mod suggest;

use std::sync::Arc;

use tokio::sync::Mutex;
use vodsync_core::error::ConfigError;
use vodsync_core::report::RunSummary;
use vodsync_core::types::CollectionMode;
use vodsync_db::snapshot::{SnapshotStore, SwapError, SwapResult};
use vodsync_fetch::FetchError;
use vodsync_fetch::api::CatalogApi;
use vodsync_fetch::maccms::MacCmsClient;
use vodsync_ingest::IngestError;
use vodsync_ingest::merge::MergeError;

use crate::config::CollectorConfig;
use crate::lock::{LockError, RunLock};
use crate::suggest::CategorySuggestion;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("snapshot swap failed: {0}")]
    Swap(#[from] SwapError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("ingest failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("source configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no source with prefix '{0}'")]
    UnknownSource(String),
    #[error("fetch task failed: {0}")]
    Task(String),
}

/// Runs collection jobs against one catalog.
///
/// Runs that write the catalog (collections and restore) are serialized:
/// within a process they queue on an async mutex, across processes the lock
/// file rejects the second run.
pub struct Collector {
    config: CollectorConfig,
    store: SnapshotStore,
    api: Arc<dyn CatalogApi>,
    writer: Mutex<()>,
}

impl Collector {
    /// A collector talking to MacCMS JSON endpoints.
    pub fn new(config: CollectorConfig) -> Result<Self, CollectError> {
        let api = MacCmsClient::new(config.request_timeout())?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    pub fn with_api(config: CollectorConfig, api: Arc<dyn CatalogApi>) -> Self {
        let store = SnapshotStore::new(config.data_dir.clone(), config.catalog.clone());
        Self {
            config,
            store,
            api,
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Walk every source's full listing.
    pub async fn run_full_collection(&self) -> Result<RunSummary, CollectError> {
        self.run(CollectionMode::Full).await
    }

    /// Walk each source's listing for items updated in the last
    /// `window_hours`.
    pub async fn run_incremental_collection(
        &self,
        window_hours: u32,
    ) -> Result<RunSummary, CollectError> {
        self.run(CollectionMode::Incremental { window_hours }).await
    }

    /// Refresh detail fields of records already in the catalog.
    pub async fn run_details_only_collection(&self) -> Result<RunSummary, CollectError> {
        self.run(CollectionMode::DetailsOnly).await
    }

    /// Put the backup snapshot back into serving.
    pub async fn restore(&self) -> Result<SwapResult, CollectError> {
        let _queued = self.writer.lock().await;
        let _lock = RunLock::acquire(&self.store.lock_path())?;
        Ok(self.store.restore().await?)
    }

    /// Suggest local categories for a source's remote ones. Takes no lock:
    /// serving is only read.
    pub async fn suggest_categories(
        &self,
        source_prefix: &str,
    ) -> Result<Vec<CategorySuggestion>, CollectError> {
        suggest::suggest_categories(
            &self.store,
            self.api.as_ref(),
            self.config.retry_policy(),
            source_prefix,
        )
        .await
    }

    async fn run(&self, mode: CollectionMode) -> Result<RunSummary, CollectError> {
        let _queued = self.writer.lock().await;
        let _lock = RunLock::acquire(&self.store.lock_path())?;
        pipeline::run(&self.config, &self.store, self.api.clone(), mode).await
    }
}
