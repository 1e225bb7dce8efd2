//! Block repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use chainlens_core::error::{StorageError, StorageResult};
use chainlens_core::models::{Block, Bytes, H256};
use chainlens_core::ports::BlockRepository;

use super::database::Database;
use super::helpers::{
    bytes_to_address, bytes_to_h256, bytes_to_h256_strict, numeric_to_u128,
    optional_numeric_to_u128, query_error,
};

const SELECT_BLOCK: &str = r#"
    SELECT number, hash, parent_hash, timestamp, miner,
           difficulty::TEXT AS difficulty, total_difficulty::TEXT AS total_difficulty,
           size, gas_limit, gas_used, base_fee_per_gas::TEXT AS base_fee_per_gas,
           transaction_count, uncle_count, state_root, receipts_root, transactions_root,
           logs_bloom, extra_data, mix_hash, nonce, indexed_at
    FROM blocks
"#;

/// Upsert one block on an open connection or transaction.
pub(crate) async fn upsert_block(conn: &mut PgConnection, block: &Block) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO blocks (
            number, hash, parent_hash, timestamp, miner, difficulty, total_difficulty,
            size, gas_limit, gas_used, base_fee_per_gas, transaction_count, uncle_count,
            state_root, receipts_root, transactions_root, logs_bloom, extra_data,
            mix_hash, nonce, indexed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8, $9, $10, $11::NUMERIC,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
        ON CONFLICT (number) DO UPDATE SET
            hash = EXCLUDED.hash,
            parent_hash = EXCLUDED.parent_hash,
            timestamp = EXCLUDED.timestamp,
            miner = EXCLUDED.miner,
            difficulty = EXCLUDED.difficulty,
            total_difficulty = EXCLUDED.total_difficulty,
            size = EXCLUDED.size,
            gas_limit = EXCLUDED.gas_limit,
            gas_used = EXCLUDED.gas_used,
            base_fee_per_gas = EXCLUDED.base_fee_per_gas,
            transaction_count = EXCLUDED.transaction_count,
            uncle_count = EXCLUDED.uncle_count,
            state_root = EXCLUDED.state_root,
            receipts_root = EXCLUDED.receipts_root,
            transactions_root = EXCLUDED.transactions_root,
            logs_bloom = EXCLUDED.logs_bloom,
            extra_data = EXCLUDED.extra_data,
            mix_hash = EXCLUDED.mix_hash,
            nonce = EXCLUDED.nonce,
            indexed_at = EXCLUDED.indexed_at
        "#,
    )
    .bind(block.number as i64)
    .bind(&block.hash.0[..])
    .bind(&block.parent_hash.0[..])
    .bind(block.timestamp)
    .bind(&block.miner.0[..])
    .bind(block.difficulty.to_string())
    .bind(block.total_difficulty.map(|d| d.to_string()))
    .bind(block.size as i64)
    .bind(block.gas_limit as i64)
    .bind(block.gas_used as i64)
    .bind(block.base_fee_per_gas.map(|f| f.to_string()))
    .bind(block.transaction_count as i32)
    .bind(block.uncle_count as i32)
    .bind(&block.state_root.0[..])
    .bind(&block.receipts_root.0[..])
    .bind(&block.transactions_root.0[..])
    .bind(&block.logs_bloom.0[..])
    .bind(&block.extra_data.0[..])
    .bind(&block.mix_hash.0[..])
    .bind(&block.nonce.0[..])
    .bind(block.indexed_at)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

/// PostgreSQL implementation of BlockRepository.
pub struct PgBlockRepository {
    pool: PgPool,
}

impl PgBlockRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl BlockRepository for PgBlockRepository {
    async fn save(&self, block: &Block) -> StorageResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        upsert_block(&mut conn, block).await
    }

    async fn save_batch(&self, blocks: &[Block]) -> StorageResult<()> {
        if blocks.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for block in blocks {
            upsert_block(&mut tx, block).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn check_exists_batch(&self, numbers: &[u64]) -> StorageResult<Vec<u64>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<i64> = numbers.iter().map(|n| *n as i64).collect();
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT number FROM blocks WHERE number = ANY($1)")
            .bind(&params)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(rows.into_iter().map(|(n,)| n as u64).collect())
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(&format!("{SELECT_BLOCK} WHERE number = $1"))
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(BlockRow::into_block).transpose()
    }

    async fn get_block_by_hash(&self, hash: &H256) -> StorageResult<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(&format!("{SELECT_BLOCK} WHERE hash = $1"))
            .bind(&hash.0[..])
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(BlockRow::into_block).transpose()
    }

    async fn latest_block_number(&self) -> StorageResult<Option<u64>> {
        // MAX returns NULL when table is empty, so we need Option<i64> in the tuple
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(number) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(row.0.map(|n| n as u64))
    }
}

/// Database row representation for Block.
#[derive(sqlx::FromRow)]
struct BlockRow {
    number: i64,
    hash: Vec<u8>,
    parent_hash: Vec<u8>,
    timestamp: chrono::DateTime<chrono::Utc>,
    miner: Vec<u8>,
    difficulty: String,
    total_difficulty: Option<String>,
    size: i64,
    gas_limit: i64,
    gas_used: i64,
    base_fee_per_gas: Option<String>,
    transaction_count: i32,
    uncle_count: i32,
    state_root: Vec<u8>,
    receipts_root: Vec<u8>,
    transactions_root: Vec<u8>,
    logs_bloom: Vec<u8>,
    extra_data: Vec<u8>,
    mix_hash: Vec<u8>,
    nonce: Vec<u8>,
    indexed_at: chrono::DateTime<chrono::Utc>,
}

impl BlockRow {
    fn into_block(self) -> StorageResult<Block> {
        Ok(Block {
            number: self.number as u64,
            hash: bytes_to_h256_strict(self.hash, "block.hash")?,
            // Fallback blocks carry zeroed roots, so only the hash is strict
            parent_hash: bytes_to_h256(self.parent_hash, "block.parent_hash")?,
            timestamp: self.timestamp,
            miner: bytes_to_address(self.miner, "block.miner")?,
            difficulty: numeric_to_u128(&self.difficulty, "block.difficulty")?,
            total_difficulty: optional_numeric_to_u128(
                self.total_difficulty,
                "block.total_difficulty",
            )?,
            size: self.size as u64,
            gas_limit: self.gas_limit as u64,
            gas_used: self.gas_used as u64,
            base_fee_per_gas: optional_numeric_to_u128(
                self.base_fee_per_gas,
                "block.base_fee_per_gas",
            )?,
            transaction_count: self.transaction_count as u32,
            uncle_count: self.uncle_count as u32,
            state_root: bytes_to_h256(self.state_root, "block.state_root")?,
            receipts_root: bytes_to_h256(self.receipts_root, "block.receipts_root")?,
            transactions_root: bytes_to_h256(self.transactions_root, "block.transactions_root")?,
            logs_bloom: Bytes(self.logs_bloom),
            extra_data: Bytes(self.extra_data),
            mix_hash: bytes_to_h256(self.mix_hash, "block.mix_hash")?,
            nonce: Bytes(self.nonce),
            indexed_at: self.indexed_at,
        })
    }
}
