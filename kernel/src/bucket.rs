// Bucket
//
// Public surface of one bucket: write path, queries, redispatch and
// rollback. A write runs arbitrate → append → dispatch in background,
// and returns as soon as the commit is durable.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::arbiter::RevisionArbitrator;
use crate::config::BucketConfig;
use crate::dispatch::{DispatchCoordinator, DispatchHandle, DispatcherRegistry, RedispatchReport};
use crate::error::Result;
use crate::log::{BucketRevision, Commit, CommitFilter, CommitStore, Event, StreamId, StreamRevision};
use crate::query;
use crate::rollback::{self, RollbackReport};

/// Outcome of a successful write.
///
/// Dropping it is fine: the dispatch keeps running, and its result stays
/// visible through the commit's dispatched flag.
#[derive(Debug, Clone)]
pub struct WriteResult {
    pub commit: Commit,
    pub dispatch: DispatchHandle,
}

#[derive(Clone)]
pub struct Bucket {
    name: String,
    store: Arc<dyn CommitStore>,
    config: BucketConfig,
    arbiter: RevisionArbitrator,
    dispatcher: DispatchCoordinator,
}

impl Bucket {
    pub(crate) fn new(
        name: impl Into<String>,
        store: Arc<dyn CommitStore>,
        dispatchers: DispatcherRegistry,
        config: BucketConfig,
    ) -> Self {
        let name = name.into();
        Self {
            arbiter: RevisionArbitrator::new(name.clone(), store.clone()),
            dispatcher: DispatchCoordinator::new(name.clone(), store.clone(), dispatchers),
            name,
            store,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    pub fn set_check_stream_revision_before_writing(&mut self, enabled: bool) {
        self.config.check_stream_revision_before_writing = enabled;
    }

    pub fn set_undispatched_wait(&mut self, wait: Duration) {
        self.config.undispatched_wait_ms = wait.as_millis() as u64;
    }

    /// Append `events` to `stream_id`, expecting the stream to be at `expected_stream_revision`.
    pub async fn write(
        &self,
        stream_id: StreamId,
        expected_stream_revision: i64,
        events: Vec<Event>,
    ) -> Result<WriteResult> {
        let commit = self
            .arbiter
            .allocate(
                stream_id,
                expected_stream_revision,
                events,
                &self.config,
            )
            .await?;

        let dispatch = self.dispatcher.dispatch_in_background(commit.clone());

        Ok(WriteResult { commit, dispatch })
    }

    pub async fn bucket_revision(&self) -> Result<BucketRevision> {
        Ok(query::bucket_revision(self.store.as_ref(), &self.name).await?)
    }

    pub async fn stream_revision(&self, stream_id: &StreamId) -> Result<StreamRevision> {
        Ok(query::stream_revision(self.store.as_ref(), &self.name, stream_id).await?)
    }

    pub async fn stream_ids(&self) -> Result<BTreeSet<StreamId>> {
        Ok(query::stream_ids(self.store.as_ref(), &self.name).await?)
    }

    pub async fn events(&self, stream_id: &StreamId) -> Result<Vec<Event>> {
        Ok(query::stream_events(self.store.as_ref(), &self.name, stream_id).await?)
    }

    pub async fn commits(&self, filter: &CommitFilter) -> Result<Vec<Commit>> {
        Ok(query::commits(self.store.as_ref(), &self.name, filter).await?)
    }

    pub async fn has_undispatched_commits(&self) -> Result<bool> {
        self.dispatcher.has_undispatched().await
    }

    /// Redeliver every undispatched commit; see [`DispatchCoordinator::redispatch_all`].
    pub async fn dispatch_undispatched(&self) -> Result<RedispatchReport> {
        self.dispatcher.redispatch_all().await
    }

    pub async fn rollback(&self, to_bucket_revision: BucketRevision) -> Result<RollbackReport> {
        rollback::rollback(self.store.as_ref(), &self.name, to_bucket_revision).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::log::MemoryCommitStore;
    use serde_json::json;

    fn bucket() -> Bucket {
        Bucket::new(
            "orders",
            Arc::new(MemoryCommitStore::new()),
            DispatcherRegistry::new(),
            BucketConfig::default(),
        )
    }

    #[tokio::test]
    async fn write_returns_commit_and_dispatch_handle() {
        let bucket = bucket();
        let stream = StreamId::new();

        let result = bucket
            .write(stream, 0, vec![json!({"n1": "v1"}), json!({"n1": "v2"})])
            .await
            .unwrap();

        assert_eq!(result.commit.bucket_revision, 1);
        assert_eq!(result.commit.stream_revision_start, 1);
        assert_eq!(result.commit.stream_revision_end, 2);
        assert_eq!(result.dispatch.bucket_revision(), 1);

        result.dispatch.await.unwrap();
        assert!(!bucket.has_undispatched_commits().await.unwrap());
    }

    #[tokio::test]
    async fn disabled_pre_check_still_rejects_reused_revision() {
        let mut bucket = bucket();
        bucket.set_check_stream_revision_before_writing(false);
        let stream = StreamId::new();

        bucket.write(stream, 0, vec![json!(1)]).await.unwrap();
        let err = bucket.write(stream, 0, vec![json!(2)]).await.unwrap_err();

        assert!(matches!(err, LedgerError::ConcurrencyConflict { current: 1, .. }));
        assert_eq!(bucket.bucket_revision().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn disabled_pre_check_still_rejects_skipped_revision() {
        let mut bucket = bucket();
        bucket.set_check_stream_revision_before_writing(false);
        let stream = StreamId::new();

        bucket.write(stream, 0, vec![json!(1)]).await.unwrap();
        let err = bucket.write(stream, 4, vec![json!(2)]).await.unwrap_err();

        assert!(matches!(err, LedgerError::NonSequential { current: 1, .. }));
        assert_eq!(bucket.stream_revision(&stream).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn undispatched_wait_is_adjustable() {
        let mut bucket = bucket();
        bucket.set_undispatched_wait(Duration::from_millis(25));
        assert_eq!(bucket.config().undispatched_wait_ms, 25);
    }

    #[tokio::test]
    async fn empty_write_is_rejected() {
        let err = bucket().write(StreamId::new(), 0, vec![]).await.unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
