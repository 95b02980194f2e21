// Commit Log Data Model
//
// A bucket is an isolated namespace of streams. Every write produces one
// commit, which takes the next bucket revision and a contiguous range of
// stream revisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileCommitStore;
pub use memory::MemoryCommitStore;
pub use store::{CommitStore, StoreError, Truncation};

/// Per-bucket sequence number, one per commit.
pub type BucketRevision = u64;

/// Per-stream sequence number, one per event.
pub type StreamRevision = u64;

/// Opaque event payload.
///
/// The log never inspects events; it only keeps them in order.
pub type Event = serde_json::Value;

/// Stable identifier for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for StreamId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// A durably persisted batch of events written in a single call.
///
/// Immutable once appended, except for `dispatched`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub bucket_revision: BucketRevision,
    pub stream_id: StreamId,
    pub stream_revision_start: StreamRevision,
    pub stream_revision_end: StreamRevision,
    pub events: Vec<Event>,
    pub dispatched: bool,
}

impl Commit {
    /// Whether the commit covers the given stream revision.
    pub fn contains(&self, stream_revision: StreamRevision) -> bool {
        (self.stream_revision_start..=self.stream_revision_end).contains(&stream_revision)
    }
}

/// A commit that has passed arbitration but has no bucket revision yet.
///
/// The store assigns the bucket revision when the insert is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCommit {
    pub stream_id: StreamId,
    pub stream_revision_start: StreamRevision,
    pub stream_revision_end: StreamRevision,
    pub events: Vec<Event>,
}

impl NewCommit {
    pub(crate) fn into_commit(self, bucket_revision: BucketRevision) -> Commit {
        Commit {
            bucket_revision,
            stream_id: self.stream_id,
            stream_revision_start: self.stream_revision_start,
            stream_revision_end: self.stream_revision_end,
            events: self.events,
            dispatched: false,
        }
    }
}

/// Metadata document kept per bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMeta {
    pub name: String,

    /// Last bucket revision handed out by the counter.
    pub revision: BucketRevision,

    /// Set when a dispatch failed; writes are refused while it is set.
    #[serde(default)]
    pub dispatch_blocked: bool,
}

impl BucketMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            revision: 0,
            dispatch_blocked: false,
        }
    }
}

/// Selection over a bucket's commits. Bounds are inclusive.
///
/// Results are always ordered by ascending bucket revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitFilter {
    pub from_bucket_revision: Option<BucketRevision>,
    pub to_bucket_revision: Option<BucketRevision>,
    pub stream_id: Option<StreamId>,
    pub undispatched_only: bool,
}

impl CommitFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn stream(stream_id: StreamId) -> Self {
        Self {
            stream_id: Some(stream_id),
            ..Self::default()
        }
    }

    pub fn undispatched() -> Self {
        Self {
            undispatched_only: true,
            ..Self::default()
        }
    }

    pub fn from(mut self, bucket_revision: BucketRevision) -> Self {
        self.from_bucket_revision = Some(bucket_revision);
        self
    }

    pub fn to(mut self, bucket_revision: BucketRevision) -> Self {
        self.to_bucket_revision = Some(bucket_revision);
        self
    }

    pub fn matches(&self, commit: &Commit) -> bool {
        if let Some(from) = self.from_bucket_revision {
            if commit.bucket_revision < from {
                return false;
            }
        }
        if let Some(to) = self.to_bucket_revision {
            if commit.bucket_revision > to {
                return false;
            }
        }
        if let Some(stream_id) = &self.stream_id {
            if &commit.stream_id != stream_id {
                return false;
            }
        }
        !(self.undispatched_only && commit.dispatched)
    }
}
