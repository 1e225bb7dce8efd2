//! Validator repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use chainlens_core::error::{StorageError, StorageResult};
use chainlens_core::models::{Address, Validator, ValidatorStatus};
use chainlens_core::ports::ValidatorRepository;

use super::helpers::{bytes_to_address, query_error};

const SELECT_VALIDATOR: &str = r#"
    SELECT address, proposed_block_count, last_proposed_block, status, uptime,
           first_seen, last_seen
    FROM validators
"#;

pub(crate) async fn upsert_validator(
    conn: &mut PgConnection,
    validator: &Validator,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO validators (
            address, proposed_block_count, last_proposed_block, status, uptime,
            first_seen, last_seen
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (address) DO UPDATE SET
            proposed_block_count = EXCLUDED.proposed_block_count,
            last_proposed_block = EXCLUDED.last_proposed_block,
            status = EXCLUDED.status,
            uptime = EXCLUDED.uptime,
            first_seen = LEAST(validators.first_seen, EXCLUDED.first_seen),
            last_seen = EXCLUDED.last_seen
        "#,
    )
    .bind(&validator.address.0[..])
    .bind(validator.proposed_block_count as i64)
    .bind(validator.last_proposed_block as i64)
    .bind(validator.status.as_str())
    .bind(validator.uptime)
    .bind(validator.first_seen)
    .bind(validator.last_seen)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

/// Flag every stored validator inactive.
pub(crate) async fn deactivate_all(conn: &mut PgConnection) -> StorageResult<u64> {
    let result = sqlx::query("UPDATE validators SET status = 'inactive' WHERE status <> 'inactive'")
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    Ok(result.rows_affected())
}

/// PostgreSQL implementation of ValidatorRepository.
pub struct PgValidatorRepository {
    pool: PgPool,
}

impl PgValidatorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ValidatorRepository for PgValidatorRepository {
    async fn save(&self, validator: &Validator) -> StorageResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        upsert_validator(&mut conn, validator).await
    }

    async fn save_batch(&self, validators: &[Validator]) -> StorageResult<()> {
        if validators.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for validator in validators {
            upsert_validator(&mut tx, validator).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn get_validator(&self, address: &Address) -> StorageResult<Option<Validator>> {
        let row =
            sqlx::query_as::<_, ValidatorRow>(&format!("{SELECT_VALIDATOR} WHERE address = $1"))
                .bind(&address.0[..])
                .fetch_optional(&self.pool)
                .await
                .map_err(query_error)?;

        row.map(ValidatorRow::into_validator).transpose()
    }

    async fn list_validators(&self) -> StorageResult<Vec<Validator>> {
        let rows = sqlx::query_as::<_, ValidatorRow>(&format!(
            "{SELECT_VALIDATOR} ORDER BY (status = 'active') DESC, address ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter().map(ValidatorRow::into_validator).collect()
    }
}

/// Database row representation for Validator.
#[derive(sqlx::FromRow)]
struct ValidatorRow {
    address: Vec<u8>,
    proposed_block_count: i64,
    last_proposed_block: i64,
    status: String,
    uptime: f64,
    first_seen: chrono::DateTime<chrono::Utc>,
    last_seen: chrono::DateTime<chrono::Utc>,
}

impl ValidatorRow {
    fn into_validator(self) -> StorageResult<Validator> {
        let status = match self.status.as_str() {
            "active" => ValidatorStatus::Active,
            "inactive" => ValidatorStatus::Inactive,
            other => {
                return Err(StorageError::SerializationError(format!(
                    "validator.status: unknown value {}",
                    other
                )));
            }
        };
        Ok(Validator {
            address: bytes_to_address(self.address, "validator.address")?,
            proposed_block_count: self.proposed_block_count as u64,
            last_proposed_block: self.last_proposed_block as u64,
            status,
            uptime: self.uptime,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        })
    }
}
