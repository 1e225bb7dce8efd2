//! Wire types of the EVM JSON-RPC API and their conversion into domain
//! models.
//!
//! Quantities arrive as `0x`-prefixed hex strings; they are decoded with
//! [`parse_quantity`] so decimal strings from lenient nodes also pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use chainlens_core::error::{ChainError, ChainResult};
use chainlens_core::models::{
    Address, Block, Bytes, H256, SignerMetrics, Transaction, TransactionStatus, parse_quantity,
};
use chainlens_core::ports::{ChainBlock, Receipt};

// =============================================================================
// Quantity decoding
// =============================================================================

fn quantity<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u128>,
{
    let raw = String::deserialize(deserializer)?;
    let value = parse_quantity(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {raw}")))?;
    T::try_from(value).map_err(|_| serde::de::Error::custom(format!("quantity overflow: {raw}")))
}

fn opt_quantity<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u128>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|raw| {
        let value = parse_quantity(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {raw}")))?;
        T::try_from(value)
            .map_err(|_| serde::de::Error::custom(format!("quantity overflow: {raw}")))
    })
    .transpose()
}

/// Decode a bare quantity result such as `eth_getBalance`.
pub(crate) fn decode_quantity(method: &str, raw: &str) -> ChainResult<u128> {
    parse_quantity(raw).ok_or_else(|| ChainError::InvalidResponse {
        method: method.to_string(),
        message: format!("invalid quantity: {raw}"),
    })
}

// =============================================================================
// Blocks & transactions
// =============================================================================

/// `eth_getBlockByNumber(n, true)` result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    #[serde(deserialize_with = "quantity")]
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    #[serde(deserialize_with = "quantity")]
    pub timestamp: u64,
    pub miner: Address,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub difficulty: Option<u128>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub total_difficulty: Option<u128>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub size: Option<u64>,
    #[serde(deserialize_with = "quantity")]
    pub gas_limit: u64,
    #[serde(deserialize_with = "quantity")]
    pub gas_used: u64,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub base_fee_per_gas: Option<u128>,
    pub state_root: H256,
    pub receipts_root: H256,
    pub transactions_root: H256,
    #[serde(default)]
    pub logs_bloom: Bytes,
    #[serde(default)]
    pub extra_data: Bytes,
    #[serde(default)]
    pub mix_hash: H256,
    #[serde(default)]
    pub nonce: Bytes,
    #[serde(default)]
    pub uncles: Vec<H256>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

/// Transaction object embedded in a full block.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: H256,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub transaction_index: Option<u32>,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(deserialize_with = "quantity")]
    pub value: u128,
    #[serde(deserialize_with = "quantity")]
    pub gas: u64,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub gas_price: Option<u128>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub max_fee_per_gas: Option<u128>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub max_priority_fee_per_gas: Option<u128>,
    #[serde(deserialize_with = "quantity")]
    pub nonce: u64,
    #[serde(default)]
    pub input: Bytes,
}

impl RpcTransaction {
    fn into_transaction(self, timestamp: DateTime<Utc>) -> Transaction {
        Transaction {
            hash: self.hash,
            block_number: self.block_number,
            block_hash: self.block_hash,
            transaction_index: self.transaction_index,
            from: self.from,
            to: self.to,
            value: self.value,
            gas_limit: self.gas,
            gas_used: None,
            gas_price: self.gas_price,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            nonce: self.nonce,
            input: self.input,
            status: TransactionStatus::Pending,
            contract_address: None,
            timestamp: Some(timestamp),
        }
    }
}

impl RpcBlock {
    /// Convert into the domain block plus its (still pending) transactions.
    pub fn into_chain_block(self) -> ChainResult<ChainBlock> {
        let timestamp = DateTime::from_timestamp(self.timestamp as i64, 0).ok_or_else(|| {
            ChainError::InvalidResponse {
                method: "eth_getBlockByNumber".to_string(),
                message: format!("timestamp out of range: {}", self.timestamp),
            }
        })?;

        let transactions: Vec<Transaction> = self
            .transactions
            .into_iter()
            .map(|tx| tx.into_transaction(timestamp))
            .collect();

        let block = Block {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp,
            miner: self.miner,
            difficulty: self.difficulty.unwrap_or_default(),
            total_difficulty: self.total_difficulty,
            size: self.size.unwrap_or_default(),
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            base_fee_per_gas: self.base_fee_per_gas,
            transaction_count: transactions.len() as u32,
            uncle_count: self.uncles.len() as u32,
            state_root: self.state_root,
            receipts_root: self.receipts_root,
            transactions_root: self.transactions_root,
            logs_bloom: self.logs_bloom,
            extra_data: self.extra_data,
            mix_hash: self.mix_hash,
            nonce: self.nonce,
            indexed_at: Utc::now(),
        };

        Ok(ChainBlock {
            block,
            transactions,
        })
    }
}

// =============================================================================
// Receipts
// =============================================================================

/// Element of `eth_getBlockReceipts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: H256,
    /// Absent on pre-Byzantium receipts.
    #[serde(default, deserialize_with = "opt_quantity")]
    pub status: Option<u8>,
    #[serde(deserialize_with = "quantity")]
    pub gas_used: u64,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl From<RpcReceipt> for Receipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            success: receipt.status.is_none_or(|s| s == 1),
            gas_used: receipt.gas_used,
            contract_address: receipt.contract_address,
        }
    }
}

// =============================================================================
// Validators
// =============================================================================

/// Element of the signer-metrics call (`qbft_getSignerMetrics` on Besu).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcSignerMetric {
    pub address: Address,
    #[serde(deserialize_with = "quantity")]
    pub proposed_block_count: u64,
    #[serde(deserialize_with = "quantity", alias = "lastProposedBlock")]
    pub last_proposed_block_number: u64,
}

impl From<RpcSignerMetric> for SignerMetrics {
    fn from(metric: RpcSignerMetric) -> Self {
        Self {
            address: metric.address,
            proposed_block_count: metric.proposed_block_count,
            last_proposed_block: metric.last_proposed_block_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> serde_json::Value {
        serde_json::json!({
            "number": "0x64",
            "hash": format!("0x{}", "ab".repeat(32)),
            "parentHash": format!("0x{}", "aa".repeat(32)),
            "timestamp": "0x65f0a000",
            "miner": format!("0x{}", "11".repeat(20)),
            "difficulty": "0x1",
            "totalDifficulty": "0x65",
            "size": "0x2a0",
            "gasLimit": "0x1c9c380",
            "gasUsed": "0xa410",
            "baseFeePerGas": "0x7",
            "stateRoot": format!("0x{}", "01".repeat(32)),
            "receiptsRoot": format!("0x{}", "02".repeat(32)),
            "transactionsRoot": format!("0x{}", "03".repeat(32)),
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "extraData": "0xf8",
            "mixHash": format!("0x{}", "63".repeat(32)),
            "nonce": "0x0000000000000000",
            "uncles": [],
            "transactions": [
                {
                    "hash": format!("0x{}", "cd".repeat(32)),
                    "blockNumber": "0x64",
                    "blockHash": format!("0x{}", "ab".repeat(32)),
                    "transactionIndex": "0x0",
                    "from": format!("0x{}", "22".repeat(20)),
                    "to": null,
                    "value": "0xde0b6b3a7640000",
                    "gas": "0x5208",
                    "gasPrice": "0x3b9aca00",
                    "maxFeePerGas": "0x77359400",
                    "maxPriorityFeePerGas": "0x3b9aca00",
                    "nonce": "0x3",
                    "input": "0x6080"
                }
            ]
        })
    }

    #[test]
    fn test_block_conversion() {
        let rpc: RpcBlock = serde_json::from_value(sample_block()).unwrap();
        let chain_block = rpc.into_chain_block().unwrap();

        let block = &chain_block.block;
        assert_eq!(block.number, 100);
        assert_eq!(block.gas_used, 0xa410);
        assert_eq!(block.base_fee_per_gas, Some(7));
        assert_eq!(block.transaction_count, 1);
        assert_eq!(block.uncle_count, 0);
        assert_eq!(block.unix_timestamp(), 0x65f0a000);

        let tx = &chain_block.transactions[0];
        assert_eq!(tx.value, 1_000_000_000_000_000_000);
        assert_eq!(tx.gas_limit, 21_000);
        assert_eq!(tx.nonce, 3);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.is_contract_creation());
        assert_eq!(tx.timestamp, Some(block.timestamp));
    }

    // Test critique: les reçus pré-Byzantium n'ont pas de status
    #[test]
    fn test_receipt_without_status_is_success() {
        let receipt: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "gasUsed": "0x5208",
            "contractAddress": null
        }))
        .unwrap();
        assert!(Receipt::from(receipt).success);

        let failed: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "status": "0x0",
            "gasUsed": "0x5208",
            "contractAddress": format!("0x{}", "33".repeat(20))
        }))
        .unwrap();
        let failed = Receipt::from(failed);
        assert!(!failed.success);
        assert_eq!(failed.contract_address, Some(Address([0x33; 20])));
    }

    #[test]
    fn test_signer_metrics_decoding() {
        let metrics: Vec<RpcSignerMetric> = serde_json::from_value(serde_json::json!([
            {
                "address": format!("0x{}", "44".repeat(20)),
                "proposedBlockCount": "0x1f",
                "lastProposedBlockNumber": "0x3e8"
            }
        ]))
        .unwrap();
        let metric = SignerMetrics::from(metrics.into_iter().next().unwrap());
        assert_eq!(metric.proposed_block_count, 31);
        assert_eq!(metric.last_proposed_block, 1000);
    }

    #[test]
    fn test_invalid_quantity_is_rejected() {
        let mut block = sample_block();
        block["gasUsed"] = serde_json::json!("0xzz");
        assert!(serde_json::from_value::<RpcBlock>(block).is_err());

        assert!(decode_quantity("eth_getBalance", "nope").is_err());
        assert_eq!(decode_quantity("eth_getBalance", "0x").unwrap(), 0);
    }
}
