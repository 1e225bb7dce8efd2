//! Tiered cache store for dashboard-critical reads.
//!
//! Two tiers share one key-value backend:
//!
//! - **latest**: pointer keys (`latest:block`, `latest:throughput`)
//!   overwritten on every block with a short TTL
//! - **immutable**: per-object keys (`block:{n}`, `tx:{hash}`) written once
//!   with a long TTL and read through in front of the store
//!
//! Misses are never cached. Write failures are logged and counted but never
//! returned, so a cache outage cannot hold back acknowledgements.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CacheResult, StorageResult};
use crate::metrics::record_cache_write_failure;
use crate::models::{Address, Block, H256, Transaction};
use crate::ports::{BlockRepository, KeyValueCache, TransactionRepository};

/// Block spacing assumed when a batch holds a single block.
pub const FALLBACK_BLOCK_SPACING_SECS: f64 = 2.0;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace prepended to every key.
    pub prefix: String,
    pub latest_ttl: Duration,
    pub immutable_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "chainlens".to_string(),
            latest_ttl: Duration::from_secs(60),
            immutable_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

// =============================================================================
// Cached Values
// =============================================================================

/// Summary stored under the latest-block pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestBlock {
    pub number: u64,
    pub hash: H256,
    pub timestamp: DateTime<Utc>,
    pub miner: Address,
    pub transaction_count: u32,
    pub gas_used: u64,
    pub gas_limit: u64,
}

impl From<&Block> for LatestBlock {
    fn from(block: &Block) -> Self {
        Self {
            number: block.number,
            hash: block.hash,
            timestamp: block.timestamp,
            miner: block.miner,
            transaction_count: block.transaction_count,
            gas_used: block.gas_used,
            gas_limit: block.gas_limit,
        }
    }
}

/// Network throughput estimate over one flushed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkThroughput {
    pub tps: f64,
    pub avg_block_time_secs: f64,
    pub block_count: usize,
    pub transaction_count: u64,
    pub from_block: u64,
    pub to_block: u64,
    pub updated_at: DateTime<Utc>,
}

impl NetworkThroughput {
    /// Estimate throughput from inter-block timestamp deltas.
    ///
    /// Each block is assumed to cover the average spacing of the batch;
    /// a single block (or a batch with no time span) uses
    /// [`FALLBACK_BLOCK_SPACING_SECS`]. Returns `None` for an empty batch.
    pub fn estimate(blocks: &[Block]) -> Option<Self> {
        let first = blocks.iter().min_by_key(|b| b.number)?;
        let last = blocks.iter().max_by_key(|b| b.number)?;
        let count = blocks.len();
        let transaction_count: u64 = blocks.iter().map(|b| u64::from(b.transaction_count)).sum();

        let span = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
        let avg_block_time_secs = if count >= 2 && span > 0.0 {
            span / (count - 1) as f64
        } else {
            FALLBACK_BLOCK_SPACING_SECS
        };

        Some(Self {
            tps: transaction_count as f64 / (avg_block_time_secs * count as f64),
            avg_block_time_secs,
            block_count: count,
            transaction_count,
            from_block: first.number,
            to_block: last.number,
            updated_at: Utc::now(),
        })
    }
}

// =============================================================================
// CacheStore
// =============================================================================

/// Typed, tiered view over a [`KeyValueCache`].
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KeyValueCache>,
    config: CacheConfig,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KeyValueCache>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Keys
    // -------------------------------------------------------------------------

    pub fn latest_block_key(&self) -> String {
        format!("{}:latest:block", self.config.prefix)
    }

    pub fn throughput_key(&self) -> String {
        format!("{}:latest:throughput", self.config.prefix)
    }

    pub fn block_key(&self, number: u64) -> String {
        format!("{}:block:{}", self.config.prefix, number)
    }

    pub fn transaction_key(&self, hash: &H256) -> String {
        format!("{}:tx:{}", self.config.prefix, hash.to_hex())
    }

    // -------------------------------------------------------------------------
    // Writes (never fail)
    // -------------------------------------------------------------------------

    /// Move the latest-block pointer forward to `block`.
    ///
    /// A block older than the cached pointer is skipped and reported as not
    /// written. An unreadable pointer is overwritten.
    pub async fn set_latest_block(&self, block: &Block) -> bool {
        if let Ok(Some(cached)) = self.latest_block().await {
            if cached.number > block.number {
                debug!(
                    block = block.number,
                    latest = cached.number,
                    "Older block, latest pointer kept"
                );
                return false;
            }
        }
        let key = self.latest_block_key();
        self.write("latest", &key, &LatestBlock::from(block), self.config.latest_ttl)
            .await
    }

    /// Overwrite the throughput pointer.
    pub async fn set_throughput(&self, throughput: &NetworkThroughput) -> bool {
        let key = self.throughput_key();
        self.write("latest", &key, throughput, self.config.latest_ttl)
            .await
    }

    /// Cache an immutable block entry.
    pub async fn set_block(&self, block: &Block) -> bool {
        let key = self.block_key(block.number);
        self.write("immutable", &key, block, self.config.immutable_ttl)
            .await
    }

    /// Cache an immutable transaction entry.
    pub async fn set_transaction(&self, tx: &Transaction) -> bool {
        let key = self.transaction_key(&tx.hash);
        self.write("immutable", &key, tx, self.config.immutable_ttl)
            .await
    }

    async fn write<T: Serialize>(
        &self,
        tier: &'static str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let result = match serde_json::to_string(value) {
            Ok(json) => self.backend.set_raw(key, &json, ttl).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, tier = tier, error = %e, "⚠️  Cache write failed");
                record_cache_write_failure(tier);
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn latest_block(&self) -> CacheResult<Option<LatestBlock>> {
        self.read(&self.latest_block_key()).await
    }

    pub async fn throughput(&self) -> CacheResult<Option<NetworkThroughput>> {
        self.read(&self.throughput_key()).await
    }

    pub async fn block(&self, number: u64) -> CacheResult<Option<Block>> {
        self.read(&self.block_key(number)).await
    }

    pub async fn transaction(&self, hash: &H256) -> CacheResult<Option<Transaction>> {
        self.read(&self.transaction_key(hash)).await
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.backend.get_raw(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Read-through
    // -------------------------------------------------------------------------

    /// Cached block, falling back to the store and populating the cache on a
    /// store hit. A store miss is not cached.
    pub async fn block_or_load(
        &self,
        number: u64,
        repo: &dyn BlockRepository,
    ) -> StorageResult<Option<Block>> {
        match self.block(number).await {
            Ok(Some(block)) => return Ok(Some(block)),
            Ok(None) => {}
            Err(e) => debug!(block = number, error = %e, "Cache read failed, using store"),
        }

        let loaded = repo.get_block(number).await?;
        if let Some(block) = &loaded {
            self.set_block(block).await;
        }
        Ok(loaded)
    }

    /// Cached transaction, falling back to the store.
    pub async fn transaction_or_load(
        &self,
        hash: &H256,
        repo: &dyn TransactionRepository,
    ) -> StorageResult<Option<Transaction>> {
        match self.transaction(hash).await {
            Ok(Some(tx)) => return Ok(Some(tx)),
            Ok(None) => {}
            Err(e) => debug!(tx = %hash, error = %e, "Cache read failed, using store"),
        }

        let loaded = repo.get_transaction(hash).await?;
        if let Some(tx) = &loaded {
            self.set_transaction(tx).await;
        }
        Ok(loaded)
    }
}
