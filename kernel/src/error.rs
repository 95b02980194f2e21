// Ledger Error Taxonomy
//
// Every failure a caller can observe from a bucket. Validation errors
// come back synchronously from `write`; dispatch errors only through a
// dispatch handle or a redispatch sweep.

use crate::dispatch::DispatchError;
use crate::log::{StoreError, StreamId, StreamRevision};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The expected revision skips ahead of the stream.
    #[error("non-sequential write to stream {stream_id}: expected revision {expected}, stream is at {current}")]
    NonSequential {
        stream_id: StreamId,
        expected: StreamRevision,
        current: StreamRevision,
    },

    /// Another writer already moved the stream past the expected revision.
    #[error("concurrency conflict on stream {stream_id}: expected revision {expected}, stream is at {current}")]
    ConcurrencyConflict {
        stream_id: StreamId,
        expected: StreamRevision,
        current: StreamRevision,
    },

    #[error("bucket `{bucket}` has undispatched commits; redispatch before writing")]
    UndispatchedEventsPending { bucket: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Caller bugs: negative or skip-ahead revisions, malformed input.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidArgument(_) | LedgerError::NonSequential { .. }
        )
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
