//! Port trait for the blockchain node.
//!
//! This trait defines the interface for enriching ingestion events with
//! data fetched from an EVM node. Implementations live in the
//! infrastructure layer (e.g., `chainlens-rpc`).

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::models::{Address, Block, Bytes, H256, ReceiptOutcome, SignerMetrics, Transaction};

/// Block fetched from the node with its full transaction bodies.
#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub block: Block,
    /// Transactions in block order, still `Pending` until receipts are applied.
    pub transactions: Vec<Transaction>,
}

/// Receipt fields the ingestion pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub success: bool,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
}

impl Receipt {
    pub fn outcome(&self) -> ReceiptOutcome {
        ReceiptOutcome {
            success: self.success,
            gas_used: self.gas_used,
            contract_address: self.contract_address,
        }
    }
}

/// Port trait for node queries.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Full block with transactions, `None` if the node doesn't know it yet.
    async fn block_by_number(&self, number: u64) -> ChainResult<Option<ChainBlock>>;

    /// All receipts of a block.
    async fn block_receipts(&self, number: u64) -> ChainResult<Vec<Receipt>>;

    /// Nonce including pending transactions.
    async fn pending_nonce(&self, address: &Address) -> ChainResult<u64>;

    /// Latest balance in wei.
    async fn balance(&self, address: &Address) -> ChainResult<u128>;

    /// Deployed bytecode, empty for an EOA.
    async fn code_at(&self, address: &Address) -> ChainResult<Bytes>;

    /// Current authoritative validator set.
    async fn validator_addresses(&self) -> ChainResult<Vec<Address>>;

    /// Per-signer proposal counters over the node's observation window.
    async fn signer_metrics(&self) -> ChainResult<Vec<SignerMetrics>>;
}
