// Commit Store Abstraction
//
// Defines the durability contract for a bucket's commits and its
// metadata document. Implementations may sit on a document database,
// a file, or process memory.

use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{BucketMeta, BucketRevision, Commit, CommitFilter, NewCommit, StreamId, StreamRevision};

/// Errors raised by a backing store.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// The insert overlaps revisions the stream already committed.
    #[error("duplicate key in bucket `{bucket}`: stream {stream_id} is at revision {current}, commit starts at {stream_revision_start}")]
    DuplicateKey {
        bucket: String,
        stream_id: StreamId,
        stream_revision_start: StreamRevision,
        current: StreamRevision,
    },

    /// The insert would leave a gap after the stream's last revision.
    #[error("gap in bucket `{bucket}`: stream {stream_id} is at revision {current}, commit starts at {stream_revision_start}")]
    NonSequential {
        bucket: String,
        stream_id: StreamId,
        stream_revision_start: StreamRevision,
        current: StreamRevision,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt store document: {0}")]
    Corrupt(String),
}

/// Result of truncating a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    /// Number of commits removed.
    pub removed: u64,

    /// Bucket revision before the truncation.
    pub previous: BucketRevision,

    /// Bucket revision after the truncation.
    pub bucket_revision: BucketRevision,
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Backing document store for commits.
///
/// Properties required from implementations:
/// - Commits are listed in ascending bucket revision order
/// - Counter increment and commit insert happen as one atomic step
/// - A commit is inserted only if it starts right after its stream's last
///   revision; an overlap is [`StoreError::DuplicateKey`], a gap is
///   [`StoreError::NonSequential`]
/// - `dispatched` is the only commit field ever updated in place
/// - The write block is only lowered while no commit is undispatched,
///   checked in the same atomic step
///
/// Implementations MUST NOT:
/// - Reorder events inside a commit
/// - Overwrite a commit that holds a bucket revision
/// - Leave a gap in bucket revisions when an insert is rejected
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Upsert the bucket's metadata document and return it.
    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketMeta, StoreError>;

    /// Load the bucket's metadata document, if the bucket exists.
    async fn bucket_meta(&self, bucket: &str) -> Result<Option<BucketMeta>, StoreError>;

    /// Names of every bucket with a metadata document.
    async fn bucket_names(&self) -> Result<Vec<String>, StoreError>;

    /// Insert a commit, assigning it the next bucket revision.
    ///
    /// Creates the bucket's metadata document on first use.
    async fn append(&self, bucket: &str, commit: NewCommit) -> Result<Commit, StoreError>;

    /// Commits matching `filter`, ascending by bucket revision.
    async fn list_commits(&self, bucket: &str, filter: &CommitFilter) -> Result<Vec<Commit>, StoreError>;

    /// The highest commit in the bucket, optionally restricted to one stream.
    async fn last_commit(
        &self,
        bucket: &str,
        stream_id: Option<&StreamId>,
    ) -> Result<Option<Commit>, StoreError>;

    /// Distinct stream ids with at least one commit.
    async fn stream_ids(&self, bucket: &str) -> Result<BTreeSet<StreamId>, StoreError>;

    /// Flip a commit's `dispatched` flag to true and lower the write block
    /// if that was the last undispatched commit. Idempotent.
    async fn mark_dispatched(&self, bucket: &str, bucket_revision: BucketRevision) -> Result<(), StoreError>;

    /// Refuse further writes to the bucket.
    async fn raise_dispatch_block(&self, bucket: &str) -> Result<(), StoreError>;

    /// Lower the write block if no commit is undispatched. Returns whether
    /// writes are still blocked.
    async fn settle_dispatch_block(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Remove every commit above `to`, rewind the counter to `to` and settle
    /// the write block, as one atomic step. A no-op if `to` is not below the
    /// current bucket revision.
    async fn truncate(&self, bucket: &str, to: BucketRevision) -> Result<Truncation, StoreError>;

    /// Remove all of the bucket's commits and its metadata document.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError>;
}
