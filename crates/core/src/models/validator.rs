//! Validator entity and signer metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    Active,
    Inactive,
}

impl ValidatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-signer counters reported by the consensus layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignerMetrics {
    pub address: Address,
    pub proposed_block_count: u64,
    pub last_proposed_block: u64,
}

/// Indexed validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub proposed_block_count: u64,
    pub last_proposed_block: u64,
    pub status: ValidatorStatus,
    /// Estimated uptime in percent (`0..=100`).
    pub uptime: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Validator {
    pub fn is_active(&self) -> bool {
        self.status == ValidatorStatus::Active
    }
}
