//! Account entity with its compliance envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Address, wei_string};

/// Maximum risk score.
pub const MAX_RISK_SCORE: u8 = 10;

/// Account classification.
///
/// An address is exactly one of these; an EOA discovered to carry code is
/// promoted in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "EOA")]
    Eoa,
    #[serde(rename = "Smart Account")]
    SmartAccount,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eoa => "EOA",
            Self::SmartAccount => "Smart Account",
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "eoa" => Ok(Self::Eoa),
            "smartaccount" => Ok(Self::SmartAccount),
            _ => Err(format!("unknown account type: {s}")),
        }
    }
}

/// Compliance status derived from the risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    Flagged,
    UnderReview,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::Flagged => "flagged",
            Self::UnderReview => "under_review",
        }
    }

    /// Map a risk score to a status: `<= 2` compliant, `<= 5` under review,
    /// otherwise flagged.
    pub fn from_risk_score(score: u8) -> Self {
        match score {
            0..=2 => Self::Compliant,
            3..=5 => Self::UnderReview,
            _ => Self::Flagged,
        }
    }
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComplianceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "compliant" => Ok(Self::Compliant),
            "flagged" => Ok(Self::Flagged),
            "under_review" | "underreview" => Ok(Self::UnderReview),
            other => Err(format!("unknown compliance status: {other}")),
        }
    }
}

/// Indexed account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub account_type: AccountType,
    #[serde(with = "wei_string")]
    pub balance: u128,
    pub nonce: u64,
    pub transaction_count: u64,
    pub contract_interaction_count: u64,
    pub contract_deployment_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Factory that deployed the smart account, if known.
    pub factory: Option<Address>,
    /// Implementation the smart account delegates to, if known.
    pub implementation: Option<Address>,
    pub owner: Option<Address>,
    pub label: Option<String>,
    pub tags: Vec<String>,
    pub risk_score: u8,
    pub compliance_status: ComplianceStatus,
    pub notes: Option<String>,
}

impl Account {
    /// New account with zeroed counters and a compliant envelope.
    pub fn new(address: Address, account_type: AccountType, now: DateTime<Utc>) -> Self {
        Self {
            address,
            account_type,
            balance: 0,
            nonce: 0,
            transaction_count: 0,
            contract_interaction_count: 0,
            contract_deployment_count: 0,
            first_seen: now,
            last_activity: now,
            factory: None,
            implementation: None,
            owner: None,
            label: None,
            tags: Vec::new(),
            risk_score: 0,
            compliance_status: ComplianceStatus::Compliant,
            notes: None,
        }
    }

    pub fn is_smart_account(&self) -> bool {
        self.account_type == AccountType::SmartAccount
    }

    /// Promote to a smart account in place, keeping counters and envelope.
    ///
    /// Returns `true` if the record changed.
    pub fn promote_to_smart_account(&mut self, implementation: Option<Address>) -> bool {
        let mut changed = false;
        if self.account_type != AccountType::SmartAccount {
            self.account_type = AccountType::SmartAccount;
            changed = true;
        }
        if implementation.is_some() && self.implementation != implementation {
            self.implementation = implementation;
            changed = true;
        }
        changed
    }

    /// Set the risk score (clamped) and derive the compliance status.
    pub fn apply_risk_score(&mut self, score: u8) {
        self.risk_score = score.min(MAX_RISK_SCORE);
        self.compliance_status = ComplianceStatus::from_risk_score(self.risk_score);
    }

    /// Replace tags, normalizing and dropping duplicates.
    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags.clear();
        self.add_tags(tags);
    }

    /// Add tags, keeping insertion order and ignoring duplicates.
    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            let tag = tag.as_ref().trim().to_lowercase();
            if !tag.is_empty() && !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
    }

    /// Record activity at `at`, never moving `last_activity` backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_activity {
            self.last_activity = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_type_parses_wire_names() {
        assert_eq!("EOA".parse::<AccountType>(), Ok(AccountType::Eoa));
        assert_eq!(
            "Smart Account".parse::<AccountType>(),
            Ok(AccountType::SmartAccount)
        );
        assert_eq!(
            "smart_account".parse::<AccountType>(),
            Ok(AccountType::SmartAccount)
        );
        assert!("contract".parse::<AccountType>().is_err());
    }

    #[test]
    fn compliance_thresholds() {
        assert_eq!(ComplianceStatus::from_risk_score(0), ComplianceStatus::Compliant);
        assert_eq!(ComplianceStatus::from_risk_score(2), ComplianceStatus::Compliant);
        assert_eq!(ComplianceStatus::from_risk_score(3), ComplianceStatus::UnderReview);
        assert_eq!(ComplianceStatus::from_risk_score(5), ComplianceStatus::UnderReview);
        assert_eq!(ComplianceStatus::from_risk_score(6), ComplianceStatus::Flagged);
    }

    #[test]
    fn risk_score_is_clamped() {
        let mut account = Account::new(Address([1; 20]), AccountType::Eoa, Utc::now());
        account.apply_risk_score(42);
        assert_eq!(account.risk_score, MAX_RISK_SCORE);
        assert_eq!(account.compliance_status, ComplianceStatus::Flagged);
    }

    #[test]
    fn promotion_keeps_counters() {
        let mut account = Account::new(Address([1; 20]), AccountType::Eoa, Utc::now());
        account.transaction_count = 7;
        assert!(account.promote_to_smart_account(Some(Address([2; 20]))));
        assert!(account.is_smart_account());
        assert_eq!(account.transaction_count, 7);
        assert!(!account.promote_to_smart_account(Some(Address([2; 20]))));
    }

    #[test]
    fn tags_are_normalized_and_deduplicated() {
        let mut account = Account::new(Address([1; 20]), AccountType::Eoa, Utc::now());
        account.set_tags(["VIP", "exchange", " vip "]);
        assert_eq!(account.tags, vec!["vip", "exchange"]);
    }

    // Test critique: un compte avec tags survit au passage JSON (cache)
    #[test]
    fn tags_roundtrip_ignoring_order() {
        let mut account = Account::new(Address([1; 20]), AccountType::SmartAccount, Utc::now());
        account.set_tags(["vip", "exchange"]);
        let json = serde_json::to_string(&account).unwrap();
        let back: Account = serde_json::from_str(&json).unwrap();

        let mut expected = vec!["exchange".to_string(), "vip".to_string()];
        let mut actual = back.tags.clone();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
        assert_eq!(back.account_type, AccountType::SmartAccount);
    }
}
