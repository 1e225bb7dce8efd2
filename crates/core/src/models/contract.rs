//! Smart contract entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Address, Bytes, H256, wei_string};

/// Verification envelope of a contract.
///
/// Verification is monotonic: once `verified` is set, ingestion never
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractVerification {
    pub verified: bool,
    pub source_code: Option<String>,
    pub abi: Option<serde_json::Value>,
    pub bytecode: Option<Bytes>,
    pub compiler_version: Option<String>,
    pub optimization_enabled: Option<bool>,
    pub optimization_runs: Option<u32>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Accumulated activity metrics of a contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractActivity {
    pub transaction_count: u64,
    pub event_count: u64,
    #[serde(with = "wei_string")]
    pub total_gas_used: u128,
    #[serde(with = "wei_string")]
    pub total_value: u128,
    pub first_activity: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ContractActivity {
    /// Fold one interaction into the running totals.
    pub fn record(&mut self, gas_used: u64, value: u128, at: DateTime<Utc>) {
        self.transaction_count += 1;
        self.total_gas_used = self.total_gas_used.saturating_add(u128::from(gas_used));
        self.total_value = self.total_value.saturating_add(value);
        if self.first_activity.is_none_or(|first| at < first) {
            self.first_activity = Some(at);
        }
        if self.last_activity.is_none_or(|last| at > last) {
            self.last_activity = Some(at);
        }
    }
}

/// Indexed smart contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartContract {
    pub address: Address,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub contract_type: Option<String>,
    pub creator: Option<Address>,
    pub creation_tx_hash: Option<H256>,
    pub creation_block: Option<u64>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub verification: ContractVerification,
    pub activity: ContractActivity,
}

impl SmartContract {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: None,
            symbol: None,
            contract_type: None,
            creator: None,
            creation_tx_hash: None,
            creation_block: None,
            creation_timestamp: None,
            verification: ContractVerification::default(),
            activity: ContractActivity::default(),
        }
    }

    /// Contract observed being created by a transaction.
    pub fn created_by(
        address: Address,
        creator: Address,
        tx_hash: H256,
        block: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            creator: Some(creator),
            creation_tx_hash: Some(tx_hash),
            creation_block: Some(block),
            creation_timestamp: Some(timestamp),
            ..Self::new(address)
        }
    }

    /// Merge an incoming verification envelope without ever un-verifying.
    pub fn merge_verification(&mut self, incoming: ContractVerification) {
        if self.verification.verified && !incoming.verified {
            return;
        }
        self.verification = incoming;
    }
}
