// Ledger Configuration
//
// Per-bucket write settings, loaded from JSON. Buckets without an
// explicit entry use the defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Settings for a single bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Read the stream's current revision before appending.
    ///
    /// When off, the store's stream head check alone rejects conflicting
    /// writes, with the same errors.
    pub check_stream_revision_before_writing: bool,

    /// How long a write waits for commits still being dispatched before it
    /// fails with undispatched events pending.
    pub undispatched_wait_ms: u64,
}

impl BucketConfig {
    pub fn undispatched_wait(&self) -> Duration {
        Duration::from_millis(self.undispatched_wait_ms)
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            check_stream_revision_before_writing: true,
            undispatched_wait_ms: 5_000,
        }
    }
}

/// Ledger configuration loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub defaults: BucketConfig,
    pub buckets: BTreeMap<String, BucketConfig>,
}

impl LedgerConfig {
    /// Built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Effective settings for `bucket`.
    pub fn for_bucket(&self, bucket: &str) -> BucketConfig {
        self.buckets
            .get(bucket)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}
