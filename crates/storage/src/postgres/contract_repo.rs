//! Smart contract repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use chainlens_core::error::{StorageError, StorageResult};
use chainlens_core::models::{
    Address, Bytes, ContractActivity, ContractVerification, SmartContract,
};
use chainlens_core::ports::SmartContractRepository;

use super::helpers::{
    bytes_to_address, bytes_to_optional_address, bytes_to_optional_h256, numeric_to_u128,
    query_error,
};

const SELECT_CONTRACT: &str = r#"
    SELECT address, name, symbol, contract_type, creator, creation_tx_hash, creation_block,
           creation_timestamp, verified, source_code, abi, bytecode, compiler_version,
           optimization_enabled, optimization_runs, verified_at, transaction_count,
           event_count, total_gas_used::TEXT AS total_gas_used,
           total_value::TEXT AS total_value, first_activity, last_activity
    FROM smart_contracts
"#;

/// Upsert one contract.
///
/// Creation fields are write-once, verification never reverts to
/// unverified and activity counters only grow.
pub(crate) async fn upsert_contract(
    conn: &mut PgConnection,
    contract: &SmartContract,
) -> StorageResult<()> {
    let verification = &contract.verification;
    let activity = &contract.activity;

    sqlx::query(
        r#"
        INSERT INTO smart_contracts (
            address, name, symbol, contract_type, creator, creation_tx_hash, creation_block,
            creation_timestamp, verified, source_code, abi, bytecode, compiler_version,
            optimization_enabled, optimization_runs, verified_at, transaction_count,
            event_count, total_gas_used, total_value, first_activity, last_activity
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19::NUMERIC, $20::NUMERIC, $21, $22)
        ON CONFLICT (address) DO UPDATE SET
            name = COALESCE(EXCLUDED.name, smart_contracts.name),
            symbol = COALESCE(EXCLUDED.symbol, smart_contracts.symbol),
            contract_type = COALESCE(EXCLUDED.contract_type, smart_contracts.contract_type),
            creator = COALESCE(smart_contracts.creator, EXCLUDED.creator),
            creation_tx_hash = COALESCE(smart_contracts.creation_tx_hash, EXCLUDED.creation_tx_hash),
            creation_block = COALESCE(smart_contracts.creation_block, EXCLUDED.creation_block),
            creation_timestamp = COALESCE(smart_contracts.creation_timestamp, EXCLUDED.creation_timestamp),
            verified = smart_contracts.verified OR EXCLUDED.verified,
            source_code = CASE WHEN smart_contracts.verified AND NOT EXCLUDED.verified
                THEN smart_contracts.source_code ELSE EXCLUDED.source_code END,
            abi = CASE WHEN smart_contracts.verified AND NOT EXCLUDED.verified
                THEN smart_contracts.abi ELSE EXCLUDED.abi END,
            bytecode = CASE WHEN smart_contracts.verified AND NOT EXCLUDED.verified
                THEN smart_contracts.bytecode ELSE EXCLUDED.bytecode END,
            compiler_version = CASE WHEN smart_contracts.verified AND NOT EXCLUDED.verified
                THEN smart_contracts.compiler_version ELSE EXCLUDED.compiler_version END,
            optimization_enabled = CASE WHEN smart_contracts.verified AND NOT EXCLUDED.verified
                THEN smart_contracts.optimization_enabled ELSE EXCLUDED.optimization_enabled END,
            optimization_runs = CASE WHEN smart_contracts.verified AND NOT EXCLUDED.verified
                THEN smart_contracts.optimization_runs ELSE EXCLUDED.optimization_runs END,
            verified_at = CASE WHEN smart_contracts.verified AND NOT EXCLUDED.verified
                THEN smart_contracts.verified_at ELSE EXCLUDED.verified_at END,
            transaction_count = GREATEST(smart_contracts.transaction_count, EXCLUDED.transaction_count),
            event_count = GREATEST(smart_contracts.event_count, EXCLUDED.event_count),
            total_gas_used = GREATEST(smart_contracts.total_gas_used, EXCLUDED.total_gas_used),
            total_value = GREATEST(smart_contracts.total_value, EXCLUDED.total_value),
            first_activity = LEAST(smart_contracts.first_activity, EXCLUDED.first_activity),
            last_activity = GREATEST(smart_contracts.last_activity, EXCLUDED.last_activity)
        "#,
    )
    .bind(&contract.address.0[..])
    .bind(&contract.name)
    .bind(&contract.symbol)
    .bind(&contract.contract_type)
    .bind(contract.creator.as_ref().map(|a| &a.0[..]))
    .bind(contract.creation_tx_hash.as_ref().map(|h| &h.0[..]))
    .bind(contract.creation_block.map(|n| n as i64))
    .bind(contract.creation_timestamp)
    .bind(verification.verified)
    .bind(&verification.source_code)
    .bind(&verification.abi)
    .bind(verification.bytecode.as_ref().map(|b| &b.0[..]))
    .bind(&verification.compiler_version)
    .bind(verification.optimization_enabled)
    .bind(verification.optimization_runs.map(|r| r as i32))
    .bind(verification.verified_at)
    .bind(activity.transaction_count as i64)
    .bind(activity.event_count as i64)
    .bind(activity.total_gas_used.to_string())
    .bind(activity.total_value.to_string())
    .bind(activity.first_activity)
    .bind(activity.last_activity)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

/// PostgreSQL implementation of SmartContractRepository.
pub struct PgSmartContractRepository {
    pool: PgPool,
}

impl PgSmartContractRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SmartContractRepository for PgSmartContractRepository {
    async fn save(&self, contract: &SmartContract) -> StorageResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        upsert_contract(&mut conn, contract).await
    }

    async fn save_batch(&self, contracts: &[SmartContract]) -> StorageResult<()> {
        if contracts.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for contract in contracts {
            upsert_contract(&mut tx, contract).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn get_contract(&self, address: &Address) -> StorageResult<Option<SmartContract>> {
        let row =
            sqlx::query_as::<_, ContractRow>(&format!("{SELECT_CONTRACT} WHERE address = $1"))
                .bind(&address.0[..])
                .fetch_optional(&self.pool)
                .await
                .map_err(query_error)?;

        row.map(ContractRow::into_contract).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct ContractRow {
    address: Vec<u8>,
    name: Option<String>,
    symbol: Option<String>,
    contract_type: Option<String>,
    creator: Option<Vec<u8>>,
    creation_tx_hash: Option<Vec<u8>>,
    creation_block: Option<i64>,
    creation_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    verified: bool,
    source_code: Option<String>,
    abi: Option<serde_json::Value>,
    bytecode: Option<Vec<u8>>,
    compiler_version: Option<String>,
    optimization_enabled: Option<bool>,
    optimization_runs: Option<i32>,
    verified_at: Option<chrono::DateTime<chrono::Utc>>,
    transaction_count: i64,
    event_count: i64,
    total_gas_used: String,
    total_value: String,
    first_activity: Option<chrono::DateTime<chrono::Utc>>,
    last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

impl ContractRow {
    fn into_contract(self) -> StorageResult<SmartContract> {
        Ok(SmartContract {
            address: bytes_to_address(self.address, "contract.address")?,
            name: self.name,
            symbol: self.symbol,
            contract_type: self.contract_type,
            creator: bytes_to_optional_address(self.creator, "contract.creator")?,
            creation_tx_hash: bytes_to_optional_h256(
                self.creation_tx_hash,
                "contract.creation_tx_hash",
            )?,
            creation_block: self.creation_block.map(|n| n as u64),
            creation_timestamp: self.creation_timestamp,
            verification: ContractVerification {
                verified: self.verified,
                source_code: self.source_code,
                abi: self.abi,
                bytecode: self.bytecode.map(Bytes),
                compiler_version: self.compiler_version,
                optimization_enabled: self.optimization_enabled,
                optimization_runs: self.optimization_runs.map(|r| r as u32),
                verified_at: self.verified_at,
            },
            activity: ContractActivity {
                transaction_count: self.transaction_count as u64,
                event_count: self.event_count as u64,
                total_gas_used: numeric_to_u128(&self.total_gas_used, "contract.total_gas_used")?,
                total_value: numeric_to_u128(&self.total_value, "contract.total_value")?,
                first_activity: self.first_activity,
                last_activity: self.last_activity,
            },
        })
    }
}
