//! Account creation events.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use chainlens_core::models::{AccountType, ComplianceStatus};
use chainlens_core::ports::{ChainClient, Repositories};
use chainlens_core::services::{AccountService, NewAccount};

use crate::consumer::{MessageHandler, Outcome};
use crate::utils::{
    extract_field, parse_address, parse_string, parse_string_list, parse_u8, parse_u64, parse_u128,
};

/// Decode an account creation payload.
///
/// `address` is required. A missing type means EOA; an unrecognized one
/// rejects the whole payload.
pub fn parse_new_account(body: &[u8]) -> Result<NewAccount, String> {
    let data: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    if !data.is_object() {
        return Err("payload is not an object".into());
    }

    let address = extract_field(&data, &["address"], parse_address)
        .ok_or_else(|| "missing or invalid address".to_string())?;
    let account_type = match extract_field(&data, &["type", "account_type"], parse_string) {
        Some(raw) => raw.parse::<AccountType>()?,
        None => AccountType::Eoa,
    };
    let compliance_status = extract_field(&data, &["compliance_status"], parse_string)
        .map(|raw| raw.parse::<ComplianceStatus>())
        .transpose()?;

    let mut new = NewAccount::new(address, account_type);
    new.balance = extract_field(&data, &["balance"], parse_u128);
    new.nonce = extract_field(&data, &["nonce"], parse_u64);
    new.label = extract_field(&data, &["label"], parse_string);
    new.risk_score = extract_field(&data, &["risk_score"], parse_u8);
    new.compliance_status = compliance_status;
    new.tags = extract_field(&data, &["tags"], parse_string_list).unwrap_or_default();
    new.notes = extract_field(&data, &["notes"], parse_string);
    Ok(new)
}

/// Creates accounts announced on the accounts queue, at most once each.
pub struct AccountHandler<R: Repositories, C: ChainClient> {
    queue: String,
    accounts: AccountService<R, C>,
}

impl<R: Repositories, C: ChainClient> AccountHandler<R, C> {
    pub fn new(queue: impl Into<String>, repositories: Arc<R>, chain: Arc<C>) -> Self {
        Self {
            queue: queue.into(),
            accounts: AccountService::new(repositories, chain),
        }
    }
}

#[async_trait]
impl<R: Repositories, C: ChainClient> MessageHandler for AccountHandler<R, C> {
    fn name(&self) -> &'static str {
        "accounts"
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, body: &[u8]) -> Outcome {
        let new = match parse_new_account(body) {
            Ok(new) => new,
            Err(reason) => {
                warn!(%reason, "⚠️  Discarding malformed account event");
                return Outcome::Ack;
            }
        };
        let address = new.address;
        let account_type = new.account_type;

        match self.accounts.create_account(new).await {
            Ok(true) => {
                info!(address = %address, %account_type, "👤 Account created");
                Outcome::Ack
            }
            Ok(false) => {
                debug!(address = %address, "Account already known, skipping");
                Outcome::Ack
            }
            Err(e) => {
                warn!(address = %address, error = %e, "⚠️  Account persist failed, requeueing");
                Outcome::Requeue
            }
        }
    }
}
