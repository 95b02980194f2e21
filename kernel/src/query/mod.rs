// Query Layer
//
// Read-only projections over a bucket's commits. None of these look at
// dispatch state unless asked to.

use std::collections::BTreeSet;

use crate::log::{BucketRevision, Commit, CommitFilter, CommitStore, Event, StoreError, StreamId, StreamRevision};

/// Highest bucket revision in use (0 for an empty bucket).
pub async fn bucket_revision(store: &dyn CommitStore, bucket: &str) -> Result<BucketRevision, StoreError> {
    Ok(store
        .last_commit(bucket, None)
        .await?
        .map_or(0, |c| c.bucket_revision))
}

/// Highest stream revision of `stream_id` (0 if the stream has no commits).
pub async fn stream_revision(
    store: &dyn CommitStore,
    bucket: &str,
    stream_id: &StreamId,
) -> Result<StreamRevision, StoreError> {
    Ok(store
        .last_commit(bucket, Some(stream_id))
        .await?
        .map_or(0, |c| c.stream_revision_end))
}

pub async fn stream_ids(store: &dyn CommitStore, bucket: &str) -> Result<BTreeSet<StreamId>, StoreError> {
    store.stream_ids(bucket).await
}

/// Replay a stream: every event of every commit, in stream revision order.
pub async fn stream_events(
    store: &dyn CommitStore,
    bucket: &str,
    stream_id: &StreamId,
) -> Result<Vec<Event>, StoreError> {
    let mut commits = store.list_commits(bucket, &CommitFilter::stream(*stream_id)).await?;
    commits.sort_by_key(|c| c.stream_revision_start);

    Ok(commits.into_iter().flat_map(|c| c.events).collect())
}

pub async fn commits(
    store: &dyn CommitStore,
    bucket: &str,
    filter: &CommitFilter,
) -> Result<Vec<Commit>, StoreError> {
    store.list_commits(bucket, filter).await
}

pub async fn has_undispatched(store: &dyn CommitStore, bucket: &str) -> Result<bool, StoreError> {
    Ok(!store
        .list_commits(bucket, &CommitFilter::undispatched())
        .await?
        .is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{MemoryCommitStore, NewCommit};
    use serde_json::json;

    fn batch(stream_id: StreamId, start: u64, values: &[&str]) -> NewCommit {
        NewCommit {
            stream_id,
            stream_revision_start: start,
            stream_revision_end: start + values.len() as u64 - 1,
            events: values.iter().map(|v| json!({ "n1": v })).collect(),
        }
    }

    #[tokio::test]
    async fn empty_bucket_reads_as_zero() {
        let store = MemoryCommitStore::new();

        assert_eq!(bucket_revision(&store, "b").await.unwrap(), 0);
        assert_eq!(stream_revision(&store, "b", &StreamId::new()).await.unwrap(), 0);
        assert!(stream_ids(&store, "b").await.unwrap().is_empty());
        assert!(!has_undispatched(&store, "b").await.unwrap());
    }

    #[tokio::test]
    async fn stream_events_concatenate_in_order() {
        let store = MemoryCommitStore::new();
        let a = StreamId::new();
        let b = StreamId::new();

        store.append("b", batch(a, 1, &["v1", "v2", "v3"])).await.unwrap();
        store.append("b", batch(b, 1, &["other"])).await.unwrap();
        store.append("b", batch(a, 4, &["v4"])).await.unwrap();

        let events = stream_events(&store, "b", &a).await.unwrap();
        let values: Vec<_> = events.iter().map(|e| e["n1"].as_str().unwrap()).collect();
        assert_eq!(values, vec!["v1", "v2", "v3", "v4"]);

        assert_eq!(stream_revision(&store, "b", &a).await.unwrap(), 4);
        assert_eq!(stream_revision(&store, "b", &b).await.unwrap(), 1);
        assert_eq!(bucket_revision(&store, "b").await.unwrap(), 3);
        assert_eq!(stream_ids(&store, "b").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn undispatched_state_tracks_flag() {
        let store = MemoryCommitStore::new();
        store.append("b", batch(StreamId::new(), 1, &["v1"])).await.unwrap();
        assert!(has_undispatched(&store, "b").await.unwrap());

        store.mark_dispatched("b", 1).await.unwrap();
        assert!(!has_undispatched(&store, "b").await.unwrap());
    }
}
