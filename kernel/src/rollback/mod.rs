// Rollback / Truncation
//
// Hard truncation of a bucket's log: commits above the target revision
// are deleted and the counter is rewound, so the next write reuses the
// freed revision numbers. There is no history of truncated commits.

use crate::error::Result;
use crate::log::{BucketRevision, CommitStore};

/// What a rollback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackReport {
    /// Number of commits removed.
    pub removed: u64,

    /// Bucket revision after the rollback.
    pub bucket_revision: BucketRevision,
}

/// Truncate `bucket` so that `to` is its last revision.
///
/// The store deletes the commits and rewinds the counter in one step, so a
/// concurrent write lands either wholly before the truncation or after it.
/// Rolling back to a revision at or above the current one changes nothing.
/// Surviving commits keep their dispatched flags; the write block is lifted
/// only if no undispatched commit survives.
pub async fn rollback(store: &dyn CommitStore, bucket: &str, to: BucketRevision) -> Result<RollbackReport> {
    let truncation = store.truncate(bucket, to).await?;

    if truncation.removed > 0 {
        tracing::info!(
            bucket,
            from = truncation.previous,
            to = truncation.bucket_revision,
            removed = truncation.removed,
            "bucket rolled back"
        );
    }

    Ok(RollbackReport {
        removed: truncation.removed,
        bucket_revision: truncation.bucket_revision,
    })
}
