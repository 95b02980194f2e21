// Dispatch Coordinator
//
// Delivers committed events to every registered dispatcher, off the
// writer's task. A commit is dispatched once every event reached every
// dispatcher; only then is its flag flipped. A failure leaves the flag
// false and raises the bucket's write block. The store lowers the block
// itself, under its own lock, once nothing is left undispatched; this
// module never writes the block down.
//
// Delivery is at-least-once: a crash between delivery and the flag update
// means the commit is delivered again by the next sweep.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{LedgerError, Result};
use crate::log::{BucketRevision, Commit, CommitFilter, CommitStore, Event, StoreError};
use crate::query;

mod handle;

pub use handle::DispatchHandle;

/// A subscriber endpoint for committed events.
///
/// Implementations must tolerate redelivery of the same event.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn name(&self) -> &str {
        "dispatcher"
    }

    /// Deliver one event.
    async fn dispatch(&self, event: &Event) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// A dispatcher returned an error. `cause` is the dispatcher's own error.
    #[error("dispatcher `{dispatcher}` failed on commit {bucket_revision} of bucket `{bucket}`: {cause}")]
    Failed {
        bucket: String,
        bucket_revision: BucketRevision,
        dispatcher: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("could not record dispatch outcome: {0}")]
    Store(#[from] StoreError),

    /// Delivery failed and the write block could not be raised either.
    #[error("{failure}; write block not recorded: {store}")]
    BlockNotRecorded {
        failure: Box<DispatchError>,
        store: StoreError,
    },

    #[error("dispatch task ended without reporting an outcome")]
    Abandoned,
}

impl DispatchError {
    /// The error raised by the dispatcher, if that is what failed.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            DispatchError::Failed { cause, .. } => Some(cause.as_ref()),
            DispatchError::BlockNotRecorded { failure, .. } => failure.cause(),
            _ => None,
        }
    }
}

/// Dispatchers shared between a ledger and every bucket obtained from it.
#[derive(Clone, Default)]
pub struct DispatcherRegistry {
    dispatchers: Arc<RwLock<Vec<Arc<dyn Dispatcher>>>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatchers.write().push(dispatcher);
    }

    pub fn len(&self) -> usize {
        self.dispatchers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Dispatcher>> {
        self.dispatchers.read().clone()
    }
}

/// Counts from a redispatch sweep that fully succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedispatchReport {
    pub attempted: usize,
    pub dispatched: usize,
    pub failed: usize,
}

/// Background delivery for one bucket.
#[derive(Clone)]
pub struct DispatchCoordinator {
    bucket: String,
    store: Arc<dyn CommitStore>,
    dispatchers: DispatcherRegistry,
}

impl DispatchCoordinator {
    pub fn new(bucket: impl Into<String>, store: Arc<dyn CommitStore>, dispatchers: DispatcherRegistry) -> Self {
        Self {
            bucket: bucket.into(),
            store,
            dispatchers,
        }
    }

    /// Dispatch `commit` on a separate task and return a handle to its outcome.
    pub fn dispatch_in_background(&self, commit: Commit) -> DispatchHandle {
        let (handle, reporter) = DispatchHandle::pending(commit.bucket_revision);
        let coordinator = self.clone();

        tokio::spawn(async move {
            let outcome = coordinator.dispatch(&commit).await;
            reporter.finish(outcome);
        });

        handle
    }

    /// Dispatch one commit, recording success on the commit and failure on the bucket.
    ///
    /// If the failure cannot be recorded, the returned error carries both.
    pub async fn dispatch(&self, commit: &Commit) -> std::result::Result<(), DispatchError> {
        match self.deliver(commit).await {
            Ok(()) => {
                self.store
                    .mark_dispatched(&self.bucket, commit.bucket_revision)
                    .await?;
                tracing::debug!(
                    bucket = %self.bucket,
                    bucket_revision = commit.bucket_revision,
                    "commit dispatched"
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!(bucket = %self.bucket, error = %err, "dispatch failed, blocking writes");
                match self.store.raise_dispatch_block(&self.bucket).await {
                    Ok(()) => Err(err),
                    Err(store) => {
                        tracing::error!(
                            bucket = %self.bucket,
                            error = %store,
                            "could not persist write block"
                        );
                        Err(DispatchError::BlockNotRecorded {
                            failure: Box::new(err),
                            store,
                        })
                    }
                }
            }
        }
    }

    /// Hand every event of `commit`, in order, to every dispatcher.
    async fn deliver(&self, commit: &Commit) -> std::result::Result<(), DispatchError> {
        let dispatchers = self.dispatchers.snapshot();

        for event in &commit.events {
            for dispatcher in &dispatchers {
                dispatcher
                    .dispatch(event)
                    .await
                    .map_err(|cause| DispatchError::Failed {
                        bucket: self.bucket.clone(),
                        bucket_revision: commit.bucket_revision,
                        dispatcher: dispatcher.name().to_string(),
                        cause: Arc::new(cause),
                    })?;
            }
        }
        Ok(())
    }

    pub async fn has_undispatched(&self) -> Result<bool> {
        Ok(query::has_undispatched(self.store.as_ref(), &self.bucket).await?)
    }

    /// Retry every undispatched commit of the bucket in ascending bucket revision.
    ///
    /// Best effort: a failing commit does not stop the sweep, and commits
    /// dispatched earlier in the sweep stay dispatched. The first failure is
    /// returned once the sweep is over. Each failure raises the write block;
    /// the store lifts it only when nothing is left undispatched, including
    /// commits appended or failed by other tasks during the sweep.
    pub async fn redispatch_all(&self) -> Result<RedispatchReport> {
        let pending = self
            .store
            .list_commits(&self.bucket, &CommitFilter::undispatched())
            .await?;

        let mut report = RedispatchReport {
            attempted: pending.len(),
            ..RedispatchReport::default()
        };
        let mut first_error = None;

        for commit in &pending {
            match self.deliver(commit).await {
                Ok(()) => {
                    self.store
                        .mark_dispatched(&self.bucket, commit.bucket_revision)
                        .await?;
                    report.dispatched += 1;
                }
                Err(err) => {
                    tracing::warn!(bucket = %self.bucket, error = %err, "redispatch failed");
                    self.store.raise_dispatch_block(&self.bucket).await?;
                    report.failed += 1;
                    first_error.get_or_insert(err);
                }
            }
        }

        let blocked = self.store.settle_dispatch_block(&self.bucket).await?;

        tracing::info!(
            bucket = %self.bucket,
            attempted = report.attempted,
            dispatched = report.dispatched,
            failed = report.failed,
            blocked,
            "redispatch sweep finished"
        );

        match first_error {
            Some(err) => Err(LedgerError::Dispatch(err)),
            None => Ok(report),
        }
    }
}
