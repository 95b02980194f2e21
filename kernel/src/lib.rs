// Ledger Kernel
//
// Event-sourcing commit log: per-bucket revision counter, optimistic
// concurrency per stream, background dispatch with undispatched tracking,
// and hard rollback.

pub mod arbiter;
pub mod bucket;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod log;
pub mod query;
pub mod rollback;

pub use bucket::{Bucket, WriteResult};
pub use config::{BucketConfig, LedgerConfig};
pub use dispatch::{DispatchError, DispatchHandle, Dispatcher, RedispatchReport};
pub use error::{LedgerError, Result};
pub use ledger::Ledger;
pub use log::{Commit, CommitFilter, CommitStore, Event, StreamId};
pub use rollback::RollbackReport;
