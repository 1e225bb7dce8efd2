//! Transaction entity and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Address, Bytes, H256, opt_wei_string, wei_string};

/// Lifecycle status of a transaction.
///
/// `Pending` is the only non-terminal state: it moves to exactly one of the
/// terminal states and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Dropped,
    Replaced,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Dropped => "dropped",
            Self::Replaced => "replaced",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match self {
            Self::Pending => true,
            terminal => *terminal == next,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "dropped" => Ok(Self::Dropped),
            "replaced" => Ok(Self::Replaced),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Indexed transaction.
///
/// Block linkage is `None` while the transaction is pending; the record is
/// mutated in place once it is mined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: H256,
    pub block_number: Option<u64>,
    pub block_hash: Option<H256>,
    pub transaction_index: Option<u32>,
    pub from: Address,
    /// Recipient; `None` for contract creation.
    pub to: Option<Address>,
    #[serde(with = "wei_string")]
    pub value: u128,
    pub gas_limit: u64,
    pub gas_used: Option<u64>,
    #[serde(default, with = "opt_wei_string")]
    pub gas_price: Option<u128>,
    #[serde(default, with = "opt_wei_string")]
    pub max_fee_per_gas: Option<u128>,
    #[serde(default, with = "opt_wei_string")]
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: u64,
    pub input: Bytes,
    pub status: TransactionStatus,
    /// Address of the contract created by this transaction, if any.
    pub contract_address: Option<Address>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Execution outcome of a mined transaction, as reported by its receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
}

impl Transaction {
    /// A transaction without recipient deploys a contract.
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Attach block linkage and settle status from the receipt.
    ///
    /// Without a receipt the mined transaction is recorded as successful;
    /// terminal states other than `Pending` are never overwritten.
    pub fn mark_mined(
        &mut self,
        block_number: u64,
        block_hash: H256,
        index: u32,
        timestamp: DateTime<Utc>,
        receipt: Option<ReceiptOutcome>,
    ) {
        self.block_number = Some(block_number);
        self.block_hash = Some(block_hash);
        self.transaction_index = Some(index);
        self.timestamp = Some(timestamp);

        let next = match receipt {
            Some(r) if !r.success => TransactionStatus::Failed,
            _ => TransactionStatus::Success,
        };
        if self.status.can_transition_to(next) {
            self.status = next;
        }

        if let Some(receipt) = receipt {
            self.gas_used = Some(receipt.gas_used);
            if receipt.contract_address.is_some() {
                self.contract_address = receipt.contract_address;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_tx() -> Transaction {
        Transaction {
            hash: H256([1; 32]),
            block_number: None,
            block_hash: None,
            transaction_index: None,
            from: Address([2; 20]),
            to: None,
            value: 0,
            gas_limit: 21_000,
            gas_used: None,
            gas_price: Some(1),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            nonce: 0,
            input: Bytes::default(),
            status: TransactionStatus::Pending,
            contract_address: None,
            timestamp: None,
        }
    }

    #[test]
    fn terminal_states_do_not_transition() {
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Dropped));
        assert!(!TransactionStatus::Success.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::Replaced.can_transition_to(TransactionStatus::Pending));
    }

    #[test]
    fn mark_mined_uses_receipt_outcome() {
        let mut tx = pending_tx();
        let created = Address([9; 20]);
        tx.mark_mined(
            10,
            H256([3; 32]),
            0,
            Utc::now(),
            Some(ReceiptOutcome {
                success: false,
                gas_used: 20_000,
                contract_address: Some(created),
            }),
        );
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.block_number, Some(10));
        assert_eq!(tx.gas_used, Some(20_000));
        assert_eq!(tx.contract_address, Some(created));
        assert!(tx.is_contract_creation());
    }

    #[test]
    fn mark_mined_keeps_terminal_status() {
        let mut tx = pending_tx();
        tx.status = TransactionStatus::Replaced;
        tx.mark_mined(10, H256([3; 32]), 0, Utc::now(), None);
        assert_eq!(tx.status, TransactionStatus::Replaced);
    }
}
