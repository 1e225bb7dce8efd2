//! Port trait for the key-value cache backend.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Raw key-value cache with per-key expiry.
///
/// Values are opaque strings; [`crate::cache::CacheStore`] layers the JSON
/// encoding and key tiers on top.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;
}
