// File-Backed Commit Store
//
// Keeps the same document collections as the memory store and writes
// them to a single JSON file after every mutation. The file is replaced
// atomically (temp file + rename), so a crash leaves either the old or
// the new document set on disk.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::memory::Collections;
use super::store::{CommitStore, StoreError, Truncation};
use super::{BucketMeta, BucketRevision, Commit, CommitFilter, NewCommit, StreamId};

pub struct FileCommitStore {
    path: PathBuf,
    collections: Mutex<Collections>,
}

impl FileCommitStore {
    /// Open the store at `path`, creating an empty one if the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let collections = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut collections: Collections = serde_json::from_slice(&bytes)?;
                collections.reindex();
                collections
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Collections::default(),
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(path = %path.display(), "opened file commit store");

        Ok(Self {
            path,
            collections: Mutex::new(collections),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a copy of the collections and keep the copy only once it is on disk.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Collections) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.collections.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, collections: &Collections) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(collections)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CommitStore for FileCommitStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketMeta, StoreError> {
        if let Some(meta) = self.collections.lock().await.bucket_meta(bucket) {
            return Ok(meta);
        }
        self.mutate(|c| Ok(c.ensure_bucket(bucket))).await
    }

    async fn bucket_meta(&self, bucket: &str) -> Result<Option<BucketMeta>, StoreError> {
        Ok(self.collections.lock().await.bucket_meta(bucket))
    }

    async fn bucket_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.collections.lock().await.bucket_names())
    }

    async fn append(&self, bucket: &str, commit: NewCommit) -> Result<Commit, StoreError> {
        self.mutate(|c| c.append(bucket, commit)).await
    }

    async fn list_commits(&self, bucket: &str, filter: &CommitFilter) -> Result<Vec<Commit>, StoreError> {
        Ok(self.collections.lock().await.list_commits(bucket, filter))
    }

    async fn last_commit(
        &self,
        bucket: &str,
        stream_id: Option<&StreamId>,
    ) -> Result<Option<Commit>, StoreError> {
        Ok(self.collections.lock().await.last_commit(bucket, stream_id))
    }

    async fn stream_ids(&self, bucket: &str) -> Result<BTreeSet<StreamId>, StoreError> {
        Ok(self.collections.lock().await.stream_ids(bucket))
    }

    async fn mark_dispatched(&self, bucket: &str, bucket_revision: BucketRevision) -> Result<(), StoreError> {
        self.mutate(|c| {
            c.mark_dispatched(bucket, bucket_revision);
            Ok(())
        })
        .await
    }

    async fn raise_dispatch_block(&self, bucket: &str) -> Result<(), StoreError> {
        self.mutate(|c| {
            c.raise_dispatch_block(bucket);
            Ok(())
        })
        .await
    }

    async fn settle_dispatch_block(&self, bucket: &str) -> Result<bool, StoreError> {
        self.mutate(|c| Ok(c.settle_dispatch_block(bucket))).await
    }

    async fn truncate(&self, bucket: &str, to: BucketRevision) -> Result<Truncation, StoreError> {
        self.mutate(|c| Ok(c.truncate(bucket, to))).await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.mutate(|c| {
            c.delete_bucket(bucket);
            Ok(())
        })
        .await
    }
}
