//! Account repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use chainlens_core::error::{StorageError, StorageResult};
use chainlens_core::models::{Account, AccountType, Address, ComplianceStatus};
use chainlens_core::ports::AccountRepository;

use super::helpers::{
    bytes_to_address, bytes_to_optional_address, numeric_to_u128, parse_text, query_error,
};

const SELECT_ACCOUNT: &str = r#"
    SELECT address, account_type, balance::TEXT AS balance, nonce, transaction_count,
           contract_interaction_count, contract_deployment_count, first_seen, last_activity,
           factory, implementation, owner, label, tags, risk_score, compliance_status, notes
    FROM accounts
"#;

const INSERT_ACCOUNT: &str = r#"
    INSERT INTO accounts (
        address, account_type, balance, nonce, transaction_count,
        contract_interaction_count, contract_deployment_count, first_seen, last_activity,
        factory, implementation, owner, label, tags, risk_score, compliance_status, notes
    )
    VALUES ($1, $2, $3::NUMERIC, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
"#;

/// Upsert one account. `first_seen` never moves forward.
pub(crate) async fn upsert_account(
    conn: &mut PgConnection,
    account: &Account,
) -> StorageResult<()> {
    let sql = format!(
        r#"{INSERT_ACCOUNT}
        ON CONFLICT (address) DO UPDATE SET
            account_type = EXCLUDED.account_type,
            balance = EXCLUDED.balance,
            nonce = EXCLUDED.nonce,
            transaction_count = EXCLUDED.transaction_count,
            contract_interaction_count = EXCLUDED.contract_interaction_count,
            contract_deployment_count = EXCLUDED.contract_deployment_count,
            first_seen = LEAST(accounts.first_seen, EXCLUDED.first_seen),
            last_activity = GREATEST(accounts.last_activity, EXCLUDED.last_activity),
            factory = EXCLUDED.factory,
            implementation = EXCLUDED.implementation,
            owner = EXCLUDED.owner,
            label = EXCLUDED.label,
            tags = EXCLUDED.tags,
            risk_score = EXCLUDED.risk_score,
            compliance_status = EXCLUDED.compliance_status,
            notes = EXCLUDED.notes
        "#
    );
    bind_account(sqlx::query(&sql), account)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    Ok(())
}

fn bind_account<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    account: &'q Account,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&account.address.0[..])
        .bind(account.account_type.as_str())
        .bind(account.balance.to_string())
        .bind(account.nonce as i64)
        .bind(account.transaction_count as i64)
        .bind(account.contract_interaction_count as i64)
        .bind(account.contract_deployment_count as i64)
        .bind(account.first_seen)
        .bind(account.last_activity)
        .bind(account.factory.as_ref().map(|a| &a.0[..]))
        .bind(account.implementation.as_ref().map(|a| &a.0[..]))
        .bind(account.owner.as_ref().map(|a| &a.0[..]))
        .bind(&account.label)
        .bind(&account.tags)
        .bind(account.risk_score as i16)
        .bind(account.compliance_status.as_str())
        .bind(&account.notes)
}

/// PostgreSQL implementation of AccountRepository.
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn save(&self, account: &Account) -> StorageResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        upsert_account(&mut conn, account).await
    }

    async fn save_batch(&self, accounts: &[Account]) -> StorageResult<()> {
        if accounts.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for account in accounts {
            upsert_account(&mut tx, account).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn create_if_absent(&self, account: &Account) -> StorageResult<bool> {
        let sql = format!("{INSERT_ACCOUNT} ON CONFLICT (address) DO NOTHING");
        let result = bind_account(sqlx::query(&sql), account)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn check_exists_batch(&self, addresses: &[Address]) -> StorageResult<Vec<Address>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<Vec<u8>> = addresses.iter().map(|a| a.0.to_vec()).collect();
        let rows: Vec<(Vec<u8>,)> =
            sqlx::query_as("SELECT address FROM accounts WHERE address = ANY($1)")
                .bind(&params)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error)?;

        rows.into_iter()
            .map(|(a,)| bytes_to_address(a, "account.address"))
            .collect()
    }

    async fn get_account(&self, address: &Address) -> StorageResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!("{SELECT_ACCOUNT} WHERE address = $1"))
            .bind(&address.0[..])
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn get_accounts(&self, addresses: &[Address]) -> StorageResult<Vec<Account>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<Vec<u8>> = addresses.iter().map(|a| a.0.to_vec()).collect();
        let rows =
            sqlx::query_as::<_, AccountRow>(&format!("{SELECT_ACCOUNT} WHERE address = ANY($1)"))
                .bind(&params)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error)?;

        rows.into_iter().map(AccountRow::into_account).collect()
    }
}

/// Database row representation for Account.
#[derive(sqlx::FromRow)]
struct AccountRow {
    address: Vec<u8>,
    account_type: String,
    balance: String,
    nonce: i64,
    transaction_count: i64,
    contract_interaction_count: i64,
    contract_deployment_count: i64,
    first_seen: chrono::DateTime<chrono::Utc>,
    last_activity: chrono::DateTime<chrono::Utc>,
    factory: Option<Vec<u8>>,
    implementation: Option<Vec<u8>>,
    owner: Option<Vec<u8>>,
    label: Option<String>,
    tags: Vec<String>,
    risk_score: i16,
    compliance_status: String,
    notes: Option<String>,
}

impl AccountRow {
    fn into_account(self) -> StorageResult<Account> {
        Ok(Account {
            address: bytes_to_address(self.address, "account.address")?,
            account_type: parse_text::<AccountType>(&self.account_type, "account.account_type")?,
            balance: numeric_to_u128(&self.balance, "account.balance")?,
            nonce: self.nonce as u64,
            transaction_count: self.transaction_count as u64,
            contract_interaction_count: self.contract_interaction_count as u64,
            contract_deployment_count: self.contract_deployment_count as u64,
            first_seen: self.first_seen,
            last_activity: self.last_activity,
            factory: bytes_to_optional_address(self.factory, "account.factory")?,
            implementation: bytes_to_optional_address(
                self.implementation,
                "account.implementation",
            )?,
            owner: bytes_to_optional_address(self.owner, "account.owner")?,
            label: self.label,
            tags: self.tags,
            risk_score: self.risk_score.clamp(0, 10) as u8,
            compliance_status: parse_text::<ComplianceStatus>(
                &self.compliance_status,
                "account.compliance_status",
            )?,
            notes: self.notes,
        })
    }
}
