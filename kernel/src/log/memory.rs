// In-Memory Commit Store
//
// Document collections held in process memory. Every operation runs
// under a single lock, which makes the counter, the stream head check,
// the dispatched flag and the write block move together.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::store::{CommitStore, StoreError, Truncation};
use super::{BucketMeta, BucketRevision, Commit, CommitFilter, NewCommit, StreamId, StreamRevision};

/// Documents belonging to one bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BucketDocuments {
    pub meta: BucketMeta,
    pub commits: BTreeMap<BucketRevision, Commit>,

    /// Last committed stream revision of every stream.
    #[serde(skip)]
    heads: HashMap<StreamId, StreamRevision>,
}

impl BucketDocuments {
    fn new(name: &str) -> Self {
        Self {
            meta: BucketMeta::new(name),
            commits: BTreeMap::new(),
            heads: HashMap::new(),
        }
    }

    fn rebuild_heads(&mut self) {
        self.heads.clear();
        for commit in self.commits.values() {
            let head = self.heads.entry(commit.stream_id).or_insert(0);
            *head = (*head).max(commit.stream_revision_end);
        }
    }

    fn has_undispatched(&self) -> bool {
        self.commits.values().any(|c| !c.dispatched)
    }

    /// Lower the block if nothing is undispatched; returns whether it is still raised.
    fn settle_dispatch_block(&mut self) -> bool {
        if self.meta.dispatch_blocked && !self.has_undispatched() {
            self.meta.dispatch_blocked = false;
        }
        self.meta.dispatch_blocked
    }
}

/// Every bucket's documents. Shared by the memory and file stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Collections {
    buckets: BTreeMap<String, BucketDocuments>,
}

impl Collections {
    /// Restore secondary indexes after deserialization.
    pub fn reindex(&mut self) {
        for docs in self.buckets.values_mut() {
            docs.rebuild_heads();
        }
    }

    fn bucket_mut(&mut self, bucket: &str) -> &mut BucketDocuments {
        self.buckets
            .entry(bucket.to_string())
            .or_insert_with(|| BucketDocuments::new(bucket))
    }

    pub fn ensure_bucket(&mut self, bucket: &str) -> BucketMeta {
        self.bucket_mut(bucket).meta.clone()
    }

    pub fn bucket_meta(&self, bucket: &str) -> Option<BucketMeta> {
        self.buckets.get(bucket).map(|docs| docs.meta.clone())
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }

    pub fn append(&mut self, bucket: &str, commit: NewCommit) -> Result<Commit, StoreError> {
        let docs = self.bucket_mut(bucket);

        let current = docs.heads.get(&commit.stream_id).copied().unwrap_or(0);
        if commit.stream_revision_start <= current {
            return Err(StoreError::DuplicateKey {
                bucket: bucket.to_string(),
                stream_id: commit.stream_id,
                stream_revision_start: commit.stream_revision_start,
                current,
            });
        }
        if commit.stream_revision_start > current + 1 {
            return Err(StoreError::NonSequential {
                bucket: bucket.to_string(),
                stream_id: commit.stream_id,
                stream_revision_start: commit.stream_revision_start,
                current,
            });
        }

        // Counter and insert move together, so a rejected insert never burns a revision.
        let bucket_revision = docs.meta.revision + 1;
        if docs.commits.contains_key(&bucket_revision) {
            return Err(StoreError::Corrupt(format!(
                "bucket `{bucket}` counter points at occupied revision {bucket_revision}"
            )));
        }
        let commit = commit.into_commit(bucket_revision);

        docs.meta.revision = bucket_revision;
        docs.heads.insert(commit.stream_id, commit.stream_revision_end);
        docs.commits.insert(bucket_revision, commit.clone());

        Ok(commit)
    }

    pub fn list_commits(&self, bucket: &str, filter: &CommitFilter) -> Vec<Commit> {
        let Some(docs) = self.buckets.get(bucket) else {
            return Vec::new();
        };

        let from = filter.from_bucket_revision.unwrap_or(0);
        let to = filter.to_bucket_revision.unwrap_or(BucketRevision::MAX);
        if from > to {
            return Vec::new();
        }

        docs.commits
            .range(from..=to)
            .map(|(_, c)| c)
            .filter(|c| filter.matches(c))
            .cloned()
            .collect()
    }

    pub fn last_commit(&self, bucket: &str, stream_id: Option<&StreamId>) -> Option<Commit> {
        let docs = self.buckets.get(bucket)?;
        docs.commits
            .values()
            .rev()
            .find(|c| stream_id.map_or(true, |id| &c.stream_id == id))
            .cloned()
    }

    pub fn stream_ids(&self, bucket: &str) -> BTreeSet<StreamId> {
        self.buckets
            .get(bucket)
            .map(|docs| docs.heads.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn mark_dispatched(&mut self, bucket: &str, bucket_revision: BucketRevision) {
        let Some(docs) = self.buckets.get_mut(bucket) else {
            return;
        };
        if let Some(commit) = docs.commits.get_mut(&bucket_revision) {
            commit.dispatched = true;
        }
        docs.settle_dispatch_block();
    }

    pub fn raise_dispatch_block(&mut self, bucket: &str) {
        self.bucket_mut(bucket).meta.dispatch_blocked = true;
    }

    pub fn settle_dispatch_block(&mut self, bucket: &str) -> bool {
        self.buckets
            .get_mut(bucket)
            .map_or(false, |docs| docs.settle_dispatch_block())
    }

    pub fn truncate(&mut self, bucket: &str, to: BucketRevision) -> Truncation {
        let Some(docs) = self.buckets.get_mut(bucket) else {
            return Truncation {
                removed: 0,
                previous: 0,
                bucket_revision: 0,
            };
        };

        let previous = docs.meta.revision;
        if to >= previous {
            return Truncation {
                removed: 0,
                previous,
                bucket_revision: previous,
            };
        }

        let removed = docs.commits.split_off(&(to + 1));
        docs.meta.revision = to;
        docs.rebuild_heads();
        docs.settle_dispatch_block();

        Truncation {
            removed: removed.len() as u64,
            previous,
            bucket_revision: to,
        }
    }

    pub fn delete_bucket(&mut self, bucket: &str) -> bool {
        self.buckets.remove(bucket).is_some()
    }
}

/// Commit store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryCommitStore {
    collections: RwLock<Collections>,
}

impl MemoryCommitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommitStore for MemoryCommitStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketMeta, StoreError> {
        Ok(self.collections.write().ensure_bucket(bucket))
    }

    async fn bucket_meta(&self, bucket: &str) -> Result<Option<BucketMeta>, StoreError> {
        Ok(self.collections.read().bucket_meta(bucket))
    }

    async fn bucket_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.collections.read().bucket_names())
    }

    async fn append(&self, bucket: &str, commit: NewCommit) -> Result<Commit, StoreError> {
        self.collections.write().append(bucket, commit)
    }

    async fn list_commits(&self, bucket: &str, filter: &CommitFilter) -> Result<Vec<Commit>, StoreError> {
        Ok(self.collections.read().list_commits(bucket, filter))
    }

    async fn last_commit(
        &self,
        bucket: &str,
        stream_id: Option<&StreamId>,
    ) -> Result<Option<Commit>, StoreError> {
        Ok(self.collections.read().last_commit(bucket, stream_id))
    }

    async fn stream_ids(&self, bucket: &str) -> Result<BTreeSet<StreamId>, StoreError> {
        Ok(self.collections.read().stream_ids(bucket))
    }

    async fn mark_dispatched(&self, bucket: &str, bucket_revision: BucketRevision) -> Result<(), StoreError> {
        self.collections.write().mark_dispatched(bucket, bucket_revision);
        Ok(())
    }

    async fn raise_dispatch_block(&self, bucket: &str) -> Result<(), StoreError> {
        self.collections.write().raise_dispatch_block(bucket);
        Ok(())
    }

    async fn settle_dispatch_block(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.collections.write().settle_dispatch_block(bucket))
    }

    async fn truncate(&self, bucket: &str, to: BucketRevision) -> Result<Truncation, StoreError> {
        Ok(self.collections.write().truncate(bucket, to))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.collections.write().delete_bucket(bucket);
        Ok(())
    }
}
