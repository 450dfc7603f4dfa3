//! Configuration types.
//!
//! Loading configuration (files, environment) is left to the application; these types
//! only describe the knobs the store and its pool understand. Both deserialize with
//! serde and fall back to their defaults for missing fields.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bucket prefix for blob storage.
pub const DEFAULT_BLOB_BUCKET: &str = "fs";

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once.
    pub max_size: usize,
    /// How long to wait for a free connection. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_size: 10, acquire_timeout: None }
    }
}

impl PoolConfig {
    /// Set maximum pool size
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

/// Store-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Deadline applied to every operation, including connection checkout.
    /// `None` disables it.
    pub operation_timeout: Option<Duration>,
    /// Bucket prefix used by [`BlobStore`](crate::blob::BlobStore).
    pub blob_bucket: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout: None,
            blob_bucket: DEFAULT_BLOB_BUCKET.to_string(),
        }
    }
}

impl StoreConfig {
    /// Set the per-operation deadline
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Set the blob bucket prefix
    pub fn blob_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.blob_bucket = bucket.into();
        self
    }
}
