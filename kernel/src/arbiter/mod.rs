// Revision Arbitrator
//
// Decides whether a write may start at the revision the caller expects,
// and hands the accepted commit to the store, which assigns the bucket
// revision.
//
// The read-based check is only a fast path. Two writers can both read the
// same current revision; the store only accepts a commit that starts right
// after its stream's last revision and rejects the loser, and that
// rejection is reported exactly like a failed pre-check.
//
// A write also waits, for a bounded time, for commits whose dispatch is
// still outstanding, and is refused outright once a dispatch failed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::BucketConfig;
use crate::error::{LedgerError, Result};
use crate::log::{
    BucketRevision, Commit, CommitFilter, CommitStore, Event, NewCommit, StoreError, StreamId, StreamRevision,
};
use crate::query;

const UNDISPATCHED_POLL: Duration = Duration::from_millis(10);

/// Outcome of checking an expected revision against the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arbitration {
    /// The write is the stream's next batch and occupies `start..=end`.
    Accept {
        start: StreamRevision,
        end: StreamRevision,
    },

    /// Negative revision or empty batch.
    InvalidArgument(String),

    /// The expected revision skips past the stream's current revision.
    NonSequential { current: StreamRevision },

    /// The stream already moved past the expected revision.
    ConcurrencyConflict { current: StreamRevision },
}

impl Arbitration {
    /// Turn a rejection into the caller-facing error; an accept yields its range.
    pub fn into_range(
        self,
        stream_id: StreamId,
        expected: i64,
    ) -> Result<(StreamRevision, StreamRevision)> {
        match self {
            Arbitration::Accept { start, end } => Ok((start, end)),
            Arbitration::InvalidArgument(reason) => Err(LedgerError::InvalidArgument(reason)),
            Arbitration::NonSequential { current } => Err(LedgerError::NonSequential {
                stream_id,
                expected: expected as StreamRevision,
                current,
            }),
            Arbitration::ConcurrencyConflict { current } => Err(LedgerError::ConcurrencyConflict {
                stream_id,
                expected: expected as StreamRevision,
                current,
            }),
        }
    }
}

/// Validate the arguments of a write before any storage access.
pub fn validate(expected: i64, event_count: usize) -> Arbitration {
    if expected < 0 {
        return Arbitration::InvalidArgument(format!(
            "expected stream revision must be >= 0, got {expected}"
        ));
    }
    if event_count == 0 {
        return Arbitration::InvalidArgument("a commit needs at least one event".into());
    }
    range(expected as StreamRevision, event_count)
}

/// Compare the expected revision with the stream's current revision.
pub fn arbitrate(expected: i64, current: StreamRevision, event_count: usize) -> Arbitration {
    match validate(expected, event_count) {
        Arbitration::Accept { .. } => {}
        rejected => return rejected,
    }

    let expected = expected as StreamRevision;
    if expected > current {
        Arbitration::NonSequential { current }
    } else if expected < current {
        Arbitration::ConcurrencyConflict { current }
    } else {
        range(expected, event_count)
    }
}

/// The error the pre-check would have raised for a commit the store refused.
pub fn store_rejection(err: StoreError, stream_id: StreamId, expected: i64) -> LedgerError {
    let expected = expected as StreamRevision;
    match err {
        StoreError::DuplicateKey { current, .. } => LedgerError::ConcurrencyConflict {
            stream_id,
            expected,
            current,
        },
        StoreError::NonSequential { current, .. } => LedgerError::NonSequential {
            stream_id,
            expected,
            current,
        },
        other => other.into(),
    }
}

fn range(expected: StreamRevision, event_count: usize) -> Arbitration {
    Arbitration::Accept {
        start: expected + 1,
        end: expected + event_count as StreamRevision,
    }
}

/// Allocates revisions for one bucket's writes.
#[derive(Clone)]
pub struct RevisionArbitrator {
    bucket: String,
    store: Arc<dyn CommitStore>,
}

impl RevisionArbitrator {
    pub fn new(bucket: impl Into<String>, store: Arc<dyn CommitStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
        }
    }

    /// Accept a write and persist it as the bucket's next commit.
    pub async fn allocate(
        &self,
        stream_id: StreamId,
        expected: i64,
        events: Vec<Event>,
        config: &BucketConfig,
    ) -> Result<Commit> {
        let (mut start, mut end) = validate(expected, events.len()).into_range(stream_id, expected)?;

        if self.is_blocked().await? {
            return Err(self.pending());
        }
        self.await_undispatched(config.undispatched_wait()).await?;

        if config.check_stream_revision_before_writing {
            let current = query::stream_revision(self.store.as_ref(), &self.bucket, &stream_id).await?;
            (start, end) = arbitrate(expected, current, events.len()).into_range(stream_id, expected)?;
        }

        let pending = NewCommit {
            stream_id,
            stream_revision_start: start,
            stream_revision_end: end,
            events,
        };

        match self.store.append(&self.bucket, pending).await {
            Ok(commit) => {
                tracing::debug!(
                    bucket = %self.bucket,
                    stream = %stream_id,
                    bucket_revision = commit.bucket_revision,
                    start,
                    end,
                    "commit appended"
                );
                Ok(commit)
            }
            Err(err) => {
                if matches!(err, StoreError::DuplicateKey { .. } | StoreError::NonSequential { .. }) {
                    tracing::warn!(
                        bucket = %self.bucket,
                        stream = %stream_id,
                        expected,
                        error = %err,
                        "store rejected write"
                    );
                }
                Err(store_rejection(err, stream_id, expected))
            }
        }
    }

    async fn is_blocked(&self) -> Result<bool> {
        Ok(self
            .store
            .bucket_meta(&self.bucket)
            .await?
            .map_or(false, |meta| meta.dispatch_blocked))
    }

    /// Wait until every commit that is undispatched now has been dispatched.
    ///
    /// Commits appended while waiting are not waited for.
    async fn await_undispatched(&self, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        let mut waiting = self.undispatched_revisions().await?;

        while !waiting.is_empty() {
            if self.is_blocked().await? {
                return Err(self.pending());
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    bucket = %self.bucket,
                    undispatched = waiting.len(),
                    "undispatched commits did not settle in time"
                );
                return Err(self.pending());
            }
            tokio::time::sleep(UNDISPATCHED_POLL.min(deadline - now)).await;

            let still = self.undispatched_revisions().await?;
            waiting.retain(|rev| still.contains(rev));
        }
        Ok(())
    }

    async fn undispatched_revisions(&self) -> Result<BTreeSet<BucketRevision>> {
        Ok(self
            .store
            .list_commits(&self.bucket, &CommitFilter::undispatched())
            .await?
            .iter()
            .map(|c| c.bucket_revision)
            .collect())
    }

    fn pending(&self) -> LedgerError {
        LedgerError::UndispatchedEventsPending {
            bucket: self.bucket.clone(),
        }
    }
}
