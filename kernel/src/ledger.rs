// Ledger
//
// Owns the backing store and the dispatcher list, and hands out bucket
// handles. Dispatchers registered here reach every bucket, including
// buckets obtained before the registration.

use std::sync::Arc;

use crate::bucket::Bucket;
use crate::config::LedgerConfig;
use crate::dispatch::{Dispatcher, DispatcherRegistry};
use crate::error::{LedgerError, Result};
use crate::log::{CommitStore, MemoryCommitStore};

pub struct Ledger {
    store: Arc<dyn CommitStore>,
    dispatchers: DispatcherRegistry,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(store: Arc<dyn CommitStore>) -> Self {
        Self::with_config(store, LedgerConfig::default_config())
    }

    pub fn with_config(store: Arc<dyn CommitStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            dispatchers: DispatcherRegistry::new(),
            config,
        }
    }

    /// A ledger over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCommitStore::new()))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CommitStore> {
        &self.store
    }

    pub fn register_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatchers.register(dispatcher);
    }

    pub fn register_dispatchers(&self, dispatchers: impl IntoIterator<Item = Arc<dyn Dispatcher>>) {
        for dispatcher in dispatchers {
            self.register_dispatcher(dispatcher);
        }
    }

    /// Handle to `name`. The bucket's documents are created on first write.
    pub fn bucket(&self, name: &str) -> Result<Bucket> {
        validate_bucket_name(name)?;
        Ok(Bucket::new(
            name,
            self.store.clone(),
            self.dispatchers.clone(),
            self.config.for_bucket(name),
        ))
    }

    /// Create the bucket's metadata document now instead of on first write.
    pub async fn create_bucket(&self, name: &str) -> Result<Bucket> {
        let bucket = self.bucket(name)?;
        self.store.ensure_bucket(name).await?;
        Ok(bucket)
    }

    pub async fn bucket_names(&self) -> Result<Vec<String>> {
        Ok(self.store.bucket_names().await?)
    }

    /// Remove every commit of `name` and discard its counter.
    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        validate_bucket_name(name)?;
        self.store.delete_bucket(name).await?;
        tracing::info!(bucket = name, "bucket deleted");
        Ok(())
    }
}

fn validate_bucket_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LedgerError::InvalidArgument("bucket name must not be empty".into()));
    }
    if name.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(LedgerError::InvalidArgument(format!(
            "bucket name `{name}` must not contain whitespace or '/'"
        )));
    }
    Ok(())
}
