//! Transaction repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use chainlens_core::error::{StorageError, StorageResult};
use chainlens_core::models::{Bytes, H256, Transaction, TransactionStatus};
use chainlens_core::ports::TransactionRepository;

use super::helpers::{
    bytes_to_address, bytes_to_h256, bytes_to_optional_address, bytes_to_optional_h256,
    numeric_to_u128, optional_numeric_to_u128, parse_text, query_error,
};

const SELECT_TRANSACTION: &str = r#"
    SELECT hash, block_number, block_hash, transaction_index, from_address, to_address,
           value::TEXT AS value, gas_limit, gas_used, gas_price::TEXT AS gas_price,
           max_fee_per_gas::TEXT AS max_fee_per_gas,
           max_priority_fee_per_gas::TEXT AS max_priority_fee_per_gas,
           nonce, input, status, contract_address, timestamp
    FROM transactions
"#;

/// Upsert one transaction.
///
/// A stored terminal status is kept; only `pending` rows take the incoming
/// status.
pub(crate) async fn upsert_transaction(
    conn: &mut PgConnection,
    tx: &Transaction,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            hash, block_number, block_hash, transaction_index, from_address, to_address,
            value, gas_limit, gas_used, gas_price, max_fee_per_gas, max_priority_fee_per_gas,
            nonce, input, status, contract_address, timestamp
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7::NUMERIC, $8, $9, $10::NUMERIC, $11::NUMERIC,
                $12::NUMERIC, $13, $14, $15, $16, $17)
        ON CONFLICT (hash) DO UPDATE SET
            block_number = COALESCE(EXCLUDED.block_number, transactions.block_number),
            block_hash = COALESCE(EXCLUDED.block_hash, transactions.block_hash),
            transaction_index = COALESCE(EXCLUDED.transaction_index, transactions.transaction_index),
            gas_used = COALESCE(EXCLUDED.gas_used, transactions.gas_used),
            status = CASE
                WHEN transactions.status = 'pending' THEN EXCLUDED.status
                ELSE transactions.status
            END,
            contract_address = COALESCE(EXCLUDED.contract_address, transactions.contract_address),
            timestamp = COALESCE(EXCLUDED.timestamp, transactions.timestamp)
        "#,
    )
    .bind(&tx.hash.0[..])
    .bind(tx.block_number.map(|n| n as i64))
    .bind(tx.block_hash.as_ref().map(|h| &h.0[..]))
    .bind(tx.transaction_index.map(|i| i as i32))
    .bind(&tx.from.0[..])
    .bind(tx.to.as_ref().map(|a| &a.0[..]))
    .bind(tx.value.to_string())
    .bind(tx.gas_limit as i64)
    .bind(tx.gas_used.map(|g| g as i64))
    .bind(tx.gas_price.map(|p| p.to_string()))
    .bind(tx.max_fee_per_gas.map(|p| p.to_string()))
    .bind(tx.max_priority_fee_per_gas.map(|p| p.to_string()))
    .bind(tx.nonce as i64)
    .bind(&tx.input.0[..])
    .bind(tx.status.as_str())
    .bind(tx.contract_address.as_ref().map(|a| &a.0[..]))
    .bind(tx.timestamp)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

/// PostgreSQL implementation of TransactionRepository.
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn save(&self, tx: &Transaction) -> StorageResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        upsert_transaction(&mut conn, tx).await
    }

    async fn save_batch(&self, txs: &[Transaction]) -> StorageResult<()> {
        if txs.is_empty() {
            return Ok(());
        }

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for tx in txs {
            upsert_transaction(&mut db_tx, tx).await?;
        }

        db_tx
            .commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn check_exists_batch(&self, hashes: &[H256]) -> StorageResult<Vec<H256>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<Vec<u8>> = hashes.iter().map(|h| h.0.to_vec()).collect();
        let rows: Vec<(Vec<u8>,)> =
            sqlx::query_as("SELECT hash FROM transactions WHERE hash = ANY($1)")
                .bind(&params)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error)?;

        rows.into_iter()
            .map(|(h,)| bytes_to_h256(h, "transaction.hash"))
            .collect()
    }

    async fn get_transaction(&self, hash: &H256) -> StorageResult<Option<Transaction>> {
        let row =
            sqlx::query_as::<_, TransactionRow>(&format!("{SELECT_TRANSACTION} WHERE hash = $1"))
                .bind(&hash.0[..])
                .fetch_optional(&self.pool)
                .await
                .map_err(query_error)?;

        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn list_for_block(&self, block_number: u64) -> StorageResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "{SELECT_TRANSACTION} WHERE block_number = $1 ORDER BY transaction_index ASC"
        ))
        .bind(block_number as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter()
            .map(TransactionRow::into_transaction)
            .collect()
    }
}

/// Database row representation for Transaction.
#[derive(sqlx::FromRow)]
struct TransactionRow {
    hash: Vec<u8>,
    block_number: Option<i64>,
    block_hash: Option<Vec<u8>>,
    transaction_index: Option<i32>,
    from_address: Vec<u8>,
    to_address: Option<Vec<u8>>,
    value: String,
    gas_limit: i64,
    gas_used: Option<i64>,
    gas_price: Option<String>,
    max_fee_per_gas: Option<String>,
    max_priority_fee_per_gas: Option<String>,
    nonce: i64,
    input: Vec<u8>,
    status: String,
    contract_address: Option<Vec<u8>>,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl TransactionRow {
    fn into_transaction(self) -> StorageResult<Transaction> {
        Ok(Transaction {
            hash: bytes_to_h256(self.hash, "transaction.hash")?,
            block_number: self.block_number.map(|n| n as u64),
            block_hash: bytes_to_optional_h256(self.block_hash, "transaction.block_hash")?,
            transaction_index: self.transaction_index.map(|i| i as u32),
            from: bytes_to_address(self.from_address, "transaction.from_address")?,
            to: bytes_to_optional_address(self.to_address, "transaction.to_address")?,
            value: numeric_to_u128(&self.value, "transaction.value")?,
            gas_limit: self.gas_limit as u64,
            gas_used: self.gas_used.map(|g| g as u64),
            gas_price: optional_numeric_to_u128(self.gas_price, "transaction.gas_price")?,
            max_fee_per_gas: optional_numeric_to_u128(
                self.max_fee_per_gas,
                "transaction.max_fee_per_gas",
            )?,
            max_priority_fee_per_gas: optional_numeric_to_u128(
                self.max_priority_fee_per_gas,
                "transaction.max_priority_fee_per_gas",
            )?,
            nonce: self.nonce as u64,
            input: Bytes(self.input),
            status: parse_text::<TransactionStatus>(&self.status, "transaction.status")?,
            contract_address: bytes_to_optional_address(
                self.contract_address,
                "transaction.contract_address",
            )?,
            timestamp: self.timestamp,
        })
    }
}
