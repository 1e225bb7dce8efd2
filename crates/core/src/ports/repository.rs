//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `chainlens-storage`).
//!
//! Every entity is keyed by its natural identifier and written with upsert
//! semantics, so replays of the same rows are harmless. Account counters are
//! increments, not upserts; callers apply them once per newly stored
//! transaction.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{Account, Address, Block, H256, SmartContract, Transaction, Validator};

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for block data.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Upsert a single block.
    async fn save(&self, block: &Block) -> StorageResult<()>;

    /// Upsert a batch of blocks in one transaction.
    async fn save_batch(&self, blocks: &[Block]) -> StorageResult<()>;

    /// Return the subset of `numbers` already stored.
    async fn check_exists_batch(&self, numbers: &[u64]) -> StorageResult<Vec<u64>>;

    /// Get block by number.
    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>>;

    /// Get block by hash.
    async fn get_block_by_hash(&self, hash: &H256) -> StorageResult<Option<Block>>;

    /// Get latest indexed block number.
    async fn latest_block_number(&self) -> StorageResult<Option<u64>>;
}

/// Repository for transaction data.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Upsert a single transaction.
    async fn save(&self, tx: &Transaction) -> StorageResult<()>;

    /// Upsert a batch of transactions in one transaction.
    async fn save_batch(&self, txs: &[Transaction]) -> StorageResult<()>;

    /// Return the subset of `hashes` already stored.
    async fn check_exists_batch(&self, hashes: &[H256]) -> StorageResult<Vec<H256>>;

    /// Get transaction by hash.
    async fn get_transaction(&self, hash: &H256) -> StorageResult<Option<Transaction>>;

    /// List transactions of a block, in block order.
    async fn list_for_block(&self, block_number: u64) -> StorageResult<Vec<Transaction>>;
}

/// Repository for account data.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Upsert a single account.
    async fn save(&self, account: &Account) -> StorageResult<()>;

    /// Upsert a batch of accounts in one transaction.
    async fn save_batch(&self, accounts: &[Account]) -> StorageResult<()>;

    /// Insert only if the address is unknown.
    ///
    /// Returns `true` if a row was created.
    async fn create_if_absent(&self, account: &Account) -> StorageResult<bool>;

    /// Return the subset of `addresses` already stored.
    async fn check_exists_batch(&self, addresses: &[Address]) -> StorageResult<Vec<Address>>;

    /// Get account by address.
    async fn get_account(&self, address: &Address) -> StorageResult<Option<Account>>;

    /// Get several accounts at once; unknown addresses are skipped.
    async fn get_accounts(&self, addresses: &[Address]) -> StorageResult<Vec<Account>>;
}

/// Repository for validator data.
#[async_trait]
pub trait ValidatorRepository: Send + Sync {
    /// Upsert a single validator.
    async fn save(&self, validator: &Validator) -> StorageResult<()>;

    /// Upsert a batch of validators in one transaction.
    async fn save_batch(&self, validators: &[Validator]) -> StorageResult<()>;

    /// Get validator by address.
    async fn get_validator(&self, address: &Address) -> StorageResult<Option<Validator>>;

    /// All known validators, active first.
    async fn list_validators(&self) -> StorageResult<Vec<Validator>>;
}

/// Repository for smart contract data.
#[async_trait]
pub trait SmartContractRepository: Send + Sync {
    /// Upsert a contract. A stored verified envelope is never cleared.
    async fn save(&self, contract: &SmartContract) -> StorageResult<()>;

    /// Upsert a batch of contracts in one transaction.
    async fn save_batch(&self, contracts: &[SmartContract]) -> StorageResult<()>;

    /// Get contract by address.
    async fn get_contract(&self, address: &Address) -> StorageResult<Option<SmartContract>>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Data bundle for atomic block batch persistence.
#[derive(Debug, Clone, Copy)]
pub struct BlockBatchData<'a> {
    pub blocks: &'a [Block],
    pub transactions: &'a [Transaction],
    pub contracts: &'a [SmartContract],
}

/// Combined repository access for the workers.
///
/// This trait provides access to all individual repositories and
/// atomic operations that span multiple rows or tables.
#[async_trait]
pub trait Repositories: Send + Sync {
    /// Access the block repository.
    fn blocks(&self) -> &dyn BlockRepository;

    /// Access the transaction repository.
    fn transactions(&self) -> &dyn TransactionRepository;

    /// Access the account repository.
    fn accounts(&self) -> &dyn AccountRepository;

    /// Access the validator repository.
    fn validators(&self) -> &dyn ValidatorRepository;

    /// Access the smart contract repository.
    fn contracts(&self) -> &dyn SmartContractRepository;

    /// Persist a block batch atomically in a single transaction.
    ///
    /// Blocks, their transactions and contract creations are written
    /// together. If any operation fails, everything is rolled back.
    async fn persist_block_batch_atomic(&self, data: BlockBatchData<'_>) -> StorageResult<()>;

    /// Replace the active validator set atomically.
    ///
    /// Marks every stored validator inactive, then upserts `active`
    /// (which must carry `ValidatorStatus::Active`). Afterwards exactly
    /// the given addresses are active.
    async fn reconcile_validators_atomic(&self, active: &[Validator]) -> StorageResult<()>;
}
