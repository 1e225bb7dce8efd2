//! Block event payload decoding.
//!
//! Three shapes are accepted, tried in order, first success wins:
//!
//! 1. structured: `{"type": "new_block", "block": {"number": .., "hash": .., ..}}`
//! 2. legacy flat object: `{"number": .., "hash": .., ..}`
//! 3. bare number: `100`, `"100"` or `"0x64"`

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use chainlens_core::models::{Address, Block, H256};

use crate::utils::{
    extract_field, parse_address, parse_h256, parse_timestamp, parse_u32, parse_u64,
};

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload matches no known block event shape")]
    UnrecognizedShape,
}

/// A new-block notification as published upstream.
///
/// Only `number` is guaranteed; the rest is whatever the publisher knew.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEvent {
    pub number: u64,
    pub hash: Option<H256>,
    pub parent_hash: Option<H256>,
    pub timestamp: Option<DateTime<Utc>>,
    pub miner: Option<Address>,
    pub gas_used: Option<u64>,
    pub gas_limit: Option<u64>,
    pub transaction_count: Option<u32>,
}

impl BlockEvent {
    fn bare(number: u64) -> Self {
        Self {
            number,
            hash: None,
            parent_hash: None,
            timestamp: None,
            miner: None,
            gas_used: None,
            gas_limit: None,
            transaction_count: None,
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body)?;

        parse_structured(&value)
            .or_else(|| parse_legacy(&value))
            .or_else(|| parse_bare(&value))
            .ok_or(PayloadError::UnrecognizedShape)
    }

    /// Block assembled from the event alone, for when the node can't serve it.
    ///
    /// Needs at least the hash; without it the record couldn't be keyed.
    pub fn fallback_block(&self) -> Option<Block> {
        let hash = self.hash?;
        let mut block =
            Block::from_summary(self.number, hash, self.timestamp.unwrap_or_else(Utc::now));
        if let Some(parent_hash) = self.parent_hash {
            block.parent_hash = parent_hash;
        }
        if let Some(miner) = self.miner {
            block.miner = miner;
        }
        block.gas_used = self.gas_used.unwrap_or_default();
        block.gas_limit = self.gas_limit.unwrap_or_default();
        block.transaction_count = self.transaction_count.unwrap_or_default();
        Some(block)
    }
}

fn parse_structured(value: &Value) -> Option<BlockEvent> {
    if value.get("type")?.as_str()? != "new_block" {
        return None;
    }
    parse_fields(value.get("block")?)
}

fn parse_legacy(value: &Value) -> Option<BlockEvent> {
    if !value.is_object() {
        return None;
    }
    parse_fields(value)
}

fn parse_bare(value: &Value) -> Option<BlockEvent> {
    match value {
        Value::Number(_) | Value::String(_) => parse_u64(value).map(BlockEvent::bare),
        _ => None,
    }
}

fn parse_fields(data: &Value) -> Option<BlockEvent> {
    let number = extract_field(data, &["number", "block_number", "blockNumber"], parse_u64)?;
    Some(BlockEvent {
        number,
        hash: extract_field(data, &["hash", "block_hash", "blockHash"], parse_h256),
        parent_hash: extract_field(data, &["parent_hash", "parentHash"], parse_h256),
        timestamp: extract_field(data, &["timestamp"], parse_timestamp),
        miner: extract_field(data, &["miner"], parse_address),
        gas_used: extract_field(data, &["gas_used", "gasUsed"], parse_u64),
        gas_limit: extract_field(data, &["gas_limit", "gasLimit"], parse_u64),
        transaction_count: extract_field(
            data,
            &["transaction_count", "transactionCount"],
            parse_u32,
        ),
    })
}
