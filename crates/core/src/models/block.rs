//! Block entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Address, Bytes, H256, opt_wei_string, wei_string};

/// Indexed block with header data and consensus artifacts.
///
/// Blocks are immutable once mined. They are created by the block
/// ingestion handler and never deleted except by a retention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block number (height).
    pub number: u64,
    /// Block hash.
    pub hash: H256,
    /// Parent block hash.
    pub parent_hash: H256,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
    /// Fee recipient / block proposer.
    pub miner: Address,
    #[serde(with = "wei_string")]
    pub difficulty: u128,
    #[serde(default, with = "opt_wei_string")]
    pub total_difficulty: Option<u128>,
    /// Encoded block size in bytes.
    pub size: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    #[serde(default, with = "opt_wei_string")]
    pub base_fee_per_gas: Option<u128>,
    pub transaction_count: u32,
    pub uncle_count: u32,
    pub state_root: H256,
    pub receipts_root: H256,
    pub transactions_root: H256,
    pub logs_bloom: Bytes,
    pub extra_data: Bytes,
    pub mix_hash: H256,
    pub nonce: Bytes,
    /// When this block was indexed.
    pub indexed_at: DateTime<Utc>,
}

impl Block {
    /// Minimal block built from an ingestion event when the node could not
    /// provide the full body. Consensus artifacts are left zeroed.
    pub fn from_summary(number: u64, hash: H256, timestamp: DateTime<Utc>) -> Self {
        Self {
            number,
            hash,
            parent_hash: H256::default(),
            timestamp,
            miner: Address::default(),
            difficulty: 0,
            total_difficulty: None,
            size: 0,
            gas_limit: 0,
            gas_used: 0,
            base_fee_per_gas: None,
            transaction_count: 0,
            uncle_count: 0,
            state_root: H256::default(),
            receipts_root: H256::default(),
            transactions_root: H256::default(),
            logs_bloom: Bytes::default(),
            extra_data: Bytes::default(),
            mix_hash: H256::default(),
            nonce: Bytes::default(),
            indexed_at: Utc::now(),
        }
    }

    /// Unix timestamp in seconds.
    pub fn unix_timestamp(&self) -> i64 {
        self.timestamp.timestamp()
    }

    /// Gas utilisation ratio in `[0, 1]`.
    pub fn gas_utilization(&self) -> f64 {
        if self.gas_limit == 0 {
            return 0.0;
        }
        self.gas_used as f64 / self.gas_limit as f64
    }
}
