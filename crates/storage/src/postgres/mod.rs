//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `chainlens-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgBlockRepository`, `PgTransactionRepository`, etc.
//!
//! Each repo exposes a crate-private `upsert_*` that takes a bare
//! connection, so the composite can run several of them in one transaction.
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_workers(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod account_repo;
mod block_repo;
mod contract_repo;
mod database;
mod helpers;
mod transaction_repo;
mod validator_repo;

pub use account_repo::PgAccountRepository;
pub use block_repo::PgBlockRepository;
pub use contract_repo::PgSmartContractRepository;
pub use database::{Database, DatabaseConfig};
pub use transaction_repo::PgTransactionRepository;
pub use validator_repo::PgValidatorRepository;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use chainlens_core::error::{StorageError, StorageResult};
use chainlens_core::models::{Validator, ValidatorStatus};
use chainlens_core::ports::{
    AccountRepository, BlockBatchData, BlockRepository, Repositories, SmartContractRepository,
    TransactionRepository, ValidatorRepository,
};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for all storage operations and
/// implements atomic transactions that span multiple tables.
pub struct PgRepositories {
    db: Arc<Database>,
    blocks: PgBlockRepository,
    transactions: PgTransactionRepository,
    accounts: PgAccountRepository,
    validators: PgValidatorRepository,
    contracts: PgSmartContractRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        let pool = db.pool().clone();
        Self {
            blocks: PgBlockRepository::new(&db),
            transactions: PgTransactionRepository::new(pool.clone()),
            accounts: PgAccountRepository::new(pool.clone()),
            validators: PgValidatorRepository::new(pool.clone()),
            contracts: PgSmartContractRepository::new(pool),
            db,
        }
    }
}

#[async_trait]
impl Repositories for PgRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        &self.blocks
    }

    fn transactions(&self) -> &dyn TransactionRepository {
        &self.transactions
    }

    fn accounts(&self) -> &dyn AccountRepository {
        &self.accounts
    }

    fn validators(&self) -> &dyn ValidatorRepository {
        &self.validators
    }

    fn contracts(&self) -> &dyn SmartContractRepository {
        &self.contracts
    }

    async fn persist_block_batch_atomic(&self, data: BlockBatchData<'_>) -> StorageResult<()> {
        if data.blocks.is_empty() && data.transactions.is_empty() && data.contracts.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for block in data.blocks {
            block_repo::upsert_block(&mut tx, block).await?;
        }

        // Transactions reference blocks only by value, order is not enforced
        for transaction in data.transactions {
            transaction_repo::upsert_transaction(&mut tx, transaction).await?;
        }

        for contract in data.contracts {
            contract_repo::upsert_contract(&mut tx, contract).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        debug!(
            blocks = data.blocks.len(),
            transactions = data.transactions.len(),
            contracts = data.contracts.len(),
            "Block batch committed"
        );

        Ok(())
    }

    async fn reconcile_validators_atomic(&self, active: &[Validator]) -> StorageResult<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        let deactivated = validator_repo::deactivate_all(&mut tx).await?;

        for validator in active {
            if validator.status != ValidatorStatus::Active {
                return Err(StorageError::ConstraintViolation(format!(
                    "validator {} is not active in the reconciled set",
                    validator.address
                )));
            }
            validator_repo::upsert_validator(&mut tx, validator).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        debug!(
            previously_active = deactivated,
            active = active.len(),
            "Validator set reconciled"
        );

        Ok(())
    }
}
