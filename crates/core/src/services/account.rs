//! Account discovery, activity tracking and compliance scoring.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::{DomainError, DomainResult};
use crate::models::{
    Account, AccountType, Address, Bytes, ComplianceStatus, MAX_RISK_SCORE, Transaction,
};
use crate::ports::{ChainClient, Repositories};

// =============================================================================
// Bytecode classification
// =============================================================================

const EIP1167_PREFIX: [u8; 10] = [0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];
const EIP1167_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];
const EIP7702_DESIGNATOR: [u8; 3] = [0xef, 0x01, 0x00];

/// What an address' bytecode says about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// No code.
    Empty,
    /// EIP-1167 minimal proxy pointing at an implementation.
    MinimalProxy(Address),
    /// EIP-7702 delegation designator.
    Delegated(Address),
    /// Any other deployed code.
    Contract,
}

impl CodeKind {
    pub fn classify(code: &Bytes) -> Self {
        let code = code.as_ref();
        if code.is_empty() {
            return Self::Empty;
        }
        if code.len() == 23
            && code.starts_with(&EIP7702_DESIGNATOR)
            && let Some(target) = Address::from_slice(&code[3..])
        {
            return Self::Delegated(target);
        }
        if code.len() == 45
            && code.starts_with(&EIP1167_PREFIX)
            && code.ends_with(&EIP1167_SUFFIX)
            && let Some(target) = Address::from_slice(&code[10..30])
        {
            return Self::MinimalProxy(target);
        }
        Self::Contract
    }

    pub fn account_type(&self) -> AccountType {
        match self {
            Self::Empty => AccountType::Eoa,
            _ => AccountType::SmartAccount,
        }
    }

    pub fn implementation(&self) -> Option<Address> {
        match self {
            Self::MinimalProxy(a) | Self::Delegated(a) => Some(*a),
            _ => None,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Thresholds for risk scoring.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Transaction count above which an account is high volume.
    pub high_volume_threshold: u64,
    /// High volume only counts if reached within this window of first seen.
    pub high_volume_window: Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_volume_threshold: 100,
            high_volume_window: Duration::hours(24),
        }
    }
}

/// Fields accepted when creating an account from an upstream event.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub address: Address,
    pub account_type: AccountType,
    pub balance: Option<u128>,
    pub nonce: Option<u64>,
    pub label: Option<String>,
    pub risk_score: Option<u8>,
    pub compliance_status: Option<ComplianceStatus>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl NewAccount {
    pub fn new(address: Address, account_type: AccountType) -> Self {
        Self {
            address,
            account_type,
            balance: None,
            nonce: None,
            label: None,
            risk_score: None,
            compliance_status: None,
            tags: Vec::new(),
            notes: None,
        }
    }

    /// Build the account with defaults, then apply the optional overrides.
    pub fn into_account(self, now: DateTime<Utc>) -> Account {
        let mut account = Account::new(self.address, self.account_type, now);
        if let Some(balance) = self.balance {
            account.balance = balance;
        }
        if let Some(nonce) = self.nonce {
            account.nonce = nonce;
        }
        account.label = self.label;
        account.notes = self.notes;
        account.set_tags(&self.tags);
        if let Some(score) = self.risk_score {
            account.apply_risk_score(score);
        }
        // An explicit status wins over the one derived from the score
        if let Some(status) = self.compliance_status {
            account.compliance_status = status;
        }
        account
    }
}

// =============================================================================
// AccountService
// =============================================================================

pub struct AccountService<R: Repositories, C: ChainClient> {
    repositories: Arc<R>,
    chain: Arc<C>,
    risk: RiskConfig,
}

impl<R: Repositories, C: ChainClient> AccountService<R, C> {
    pub fn new(repositories: Arc<R>, chain: Arc<C>) -> Self {
        Self {
            repositories,
            chain,
            risk: RiskConfig::default(),
        }
    }

    pub fn with_risk_config(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    /// Classify an address from its on-chain code.
    ///
    /// A node failure defaults to EOA; promotion happens later if code shows up.
    pub async fn detect_account_type(&self, address: &Address) -> CodeKind {
        match self.chain.code_at(address).await {
            Ok(code) => CodeKind::classify(&code),
            Err(e) => {
                debug!(address = %address, error = %e, "Code lookup failed, assuming EOA");
                CodeKind::Empty
            }
        }
    }

    /// Get the stored account or create it with the detected type.
    #[instrument(skip_all, fields(address = %address))]
    pub async fn discover_account(&self, address: &Address) -> DomainResult<Account> {
        if let Some(account) = self.repositories.accounts().get_account(address).await? {
            return Ok(account);
        }

        let kind = self.detect_account_type(address).await;
        let mut account = Account::new(*address, kind.account_type(), Utc::now());
        account.implementation = kind.implementation();
        if let Ok(balance) = self.chain.balance(address).await {
            account.balance = balance;
        }
        if let Ok(nonce) = self.chain.pending_nonce(address).await {
            account.nonce = nonce;
        }

        if self.repositories.accounts().create_if_absent(&account).await? {
            debug!(account_type = %account.account_type, "🆕 Account discovered");
            return Ok(account);
        }

        // Lost a race with another writer
        self.repositories
            .accounts()
            .get_account(address)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(address.to_hex()))
    }

    /// Idempotent creation. Returns `false` if the address already exists.
    #[instrument(skip_all, fields(address = %new.address))]
    pub async fn create_account(&self, new: NewAccount) -> DomainResult<bool> {
        let accounts = self.repositories.accounts();
        if accounts.get_account(&new.address).await?.is_some() {
            debug!("Account already exists");
            return Ok(false);
        }
        let account = new.into_account(Utc::now());
        Ok(accounts.create_if_absent(&account).await?)
    }

    /// Create every unknown account in one batch. Returns how many were new.
    pub async fn bulk_create_accounts(&self, new: Vec<NewAccount>) -> DomainResult<usize> {
        let addresses: Vec<Address> = new.iter().map(|n| n.address).collect();
        let existing = self
            .repositories
            .accounts()
            .check_exists_batch(&addresses)
            .await?;

        let now = Utc::now();
        let mut seen = existing;
        let mut fresh = Vec::new();
        for item in new {
            if seen.contains(&item.address) {
                continue;
            }
            seen.push(item.address);
            fresh.push(item.into_account(now));
        }

        if !fresh.is_empty() {
            self.repositories.accounts().save_batch(&fresh).await?;
        }
        info!(created = fresh.len(), "👤 Bulk account creation");
        Ok(fresh.len())
    }

    /// Promote an account to Smart Account in place.
    pub async fn promote_to_smart_account(
        &self,
        address: &Address,
        implementation: Option<Address>,
    ) -> DomainResult<Account> {
        let mut account = self.discover_account(address).await?;
        if account.promote_to_smart_account(implementation) {
            self.repositories.accounts().save(&account).await?;
            info!(address = %address, "🔼 Account promoted to Smart Account");
        }
        Ok(account)
    }

    // -------------------------------------------------------------------------
    // Activity
    // -------------------------------------------------------------------------

    /// Update counters of every account touched by a transaction.
    ///
    /// Sender, recipient and created contract are loaded once, updated and
    /// written back in one batch, so a self-transfer is counted once.
    #[instrument(skip_all, fields(tx = %tx.hash))]
    pub async fn process_transaction_for_accounts(&self, tx: &Transaction) -> DomainResult<()> {
        let at = tx.timestamp.unwrap_or_else(Utc::now);
        let mut touched: HashMap<Address, Account> = HashMap::new();

        let sender = self.discover_account(&tx.from).await?;
        touched.insert(tx.from, sender);

        let mut interacts_with_contract = false;
        if let Some(to) = tx.to {
            if !touched.contains_key(&to) {
                let recipient = self.discover_account(&to).await?;
                touched.insert(to, recipient);
            }
            if let Some(recipient) = touched.get_mut(&to) {
                interacts_with_contract = recipient.is_smart_account();
                if to != tx.from {
                    recipient.transaction_count += 1;
                }
                recipient.touch(at);
            }
        }

        if let Some(created) = tx.contract_address {
            if !touched.contains_key(&created) {
                let contract = self.discover_account(&created).await?;
                touched.insert(created, contract);
            }
            if let Some(contract) = touched.get_mut(&created) {
                contract.promote_to_smart_account(None);
                contract.touch(at);
            }
        }

        if let Some(sender) = touched.get_mut(&tx.from) {
            sender.transaction_count += 1;
            sender.nonce = sender.nonce.max(tx.nonce + 1);
            if interacts_with_contract {
                sender.contract_interaction_count += 1;
            }
            if tx.is_contract_creation() {
                sender.contract_deployment_count += 1;
            }
            sender.touch(at);
        }

        let accounts: Vec<Account> = touched.into_values().collect();
        self.repositories.accounts().save_batch(&accounts).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Compliance
    // -------------------------------------------------------------------------

    /// Heuristic risk score in `0..=10`.
    pub fn calculate_risk_score(&self, account: &Account) -> u8 {
        let mut score: u8 = 0;

        let active_span = account.last_activity - account.first_seen;
        if account.transaction_count > self.risk.high_volume_threshold
            && active_span <= self.risk.high_volume_window
        {
            score += 3;
        }

        if account.contract_interaction_count > account.transaction_count / 2 {
            score += 2;
        }

        score.min(MAX_RISK_SCORE)
    }

    /// Recompute the score and status of an account and persist them.
    pub async fn analyze_compliance(&self, address: &Address) -> DomainResult<Account> {
        let mut account = self.load(address).await?;
        let score = self.calculate_risk_score(&account);
        account.apply_risk_score(score);
        self.repositories.accounts().save(&account).await?;
        debug!(address = %address, score, status = %account.compliance_status, "Compliance analyzed");
        Ok(account)
    }

    pub async fn bulk_analyze_compliance(&self, addresses: &[Address]) -> DomainResult<Vec<Account>> {
        let mut accounts = self.repositories.accounts().get_accounts(addresses).await?;
        for account in &mut accounts {
            let score = self.calculate_risk_score(account);
            account.apply_risk_score(score);
        }
        self.repositories.accounts().save_batch(&accounts).await?;
        Ok(accounts)
    }

    pub async fn update_compliance(
        &self,
        address: &Address,
        status: ComplianceStatus,
        notes: Option<String>,
    ) -> DomainResult<Account> {
        let mut account = self.load(address).await?;
        account.compliance_status = status;
        if notes.is_some() {
            account.notes = notes;
        }
        self.repositories.accounts().save(&account).await?;
        Ok(account)
    }

    /// Returns the number of accounts updated; unknown addresses are skipped.
    pub async fn bulk_update_compliance(
        &self,
        addresses: &[Address],
        status: ComplianceStatus,
    ) -> DomainResult<usize> {
        let mut accounts = self.repositories.accounts().get_accounts(addresses).await?;
        for account in &mut accounts {
            account.compliance_status = status;
        }
        self.repositories.accounts().save_batch(&accounts).await?;
        Ok(accounts.len())
    }

    // -------------------------------------------------------------------------
    // Tags
    // -------------------------------------------------------------------------

    pub async fn update_tags(&self, address: &Address, tags: &[String]) -> DomainResult<Account> {
        let mut account = self.load(address).await?;
        account.set_tags(tags);
        self.repositories.accounts().save(&account).await?;
        Ok(account)
    }

    pub async fn add_tags(&self, address: &Address, tags: &[String]) -> DomainResult<Account> {
        let mut account = self.load(address).await?;
        account.add_tags(tags);
        self.repositories.accounts().save(&account).await?;
        Ok(account)
    }

    /// Replace tags on every known address. Returns the number updated.
    pub async fn bulk_update_tags(
        &self,
        addresses: &[Address],
        tags: &[String],
    ) -> DomainResult<usize> {
        let mut accounts = self.repositories.accounts().get_accounts(addresses).await?;
        for account in &mut accounts {
            account.set_tags(tags);
        }
        self.repositories.accounts().save_batch(&accounts).await?;
        Ok(accounts.len())
    }

    async fn load(&self, address: &Address) -> DomainResult<Account> {
        self.repositories
            .accounts()
            .get_account(address)
            .await?
            .ok_or_else(|| {
                warn!(address = %address, "Account not found");
                DomainError::AccountNotFound(address.to_hex())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bytes, H256, TransactionStatus};
    use crate::testing::{MemoryRepositories, StaticChain};

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn service(chain: StaticChain) -> (Arc<MemoryRepositories>, AccountService<MemoryRepositories, StaticChain>) {
        let repos = Arc::new(MemoryRepositories::new());
        let service = AccountService::new(repos.clone(), Arc::new(chain));
        (repos, service)
    }

    fn transfer(from: Address, to: Option<Address>) -> Transaction {
        Transaction {
            hash: H256([7; 32]),
            block_number: Some(1),
            block_hash: Some(H256([1; 32])),
            transaction_index: Some(0),
            from,
            to,
            value: 10,
            gas_limit: 21_000,
            gas_used: Some(21_000),
            gas_price: Some(1),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            nonce: 4,
            input: Bytes::default(),
            status: TransactionStatus::Success,
            contract_address: None,
            timestamp: Some(Utc::now()),
        }
    }

    #[test]
    fn classify_bytecode() {
        assert_eq!(CodeKind::classify(&Bytes::default()), CodeKind::Empty);

        let mut proxy = EIP1167_PREFIX.to_vec();
        proxy.extend_from_slice(&[0xaa; 20]);
        proxy.extend_from_slice(&EIP1167_SUFFIX);
        assert_eq!(
            CodeKind::classify(&Bytes(proxy)),
            CodeKind::MinimalProxy(addr(0xaa))
        );

        let mut delegated = EIP7702_DESIGNATOR.to_vec();
        delegated.extend_from_slice(&[0xbb; 20]);
        let kind = CodeKind::classify(&Bytes(delegated));
        assert_eq!(kind, CodeKind::Delegated(addr(0xbb)));
        assert_eq!(kind.account_type(), AccountType::SmartAccount);

        assert_eq!(CodeKind::classify(&Bytes(vec![0x60, 0x80])), CodeKind::Contract);
    }

    // Test critique: bornes du score de risque
    #[test]
    fn risk_score_bounds() {
        let (_, service) = service(StaticChain::new());
        let now = Utc::now();

        let quiet = Account::new(addr(1), AccountType::Eoa, now);
        assert_eq!(service.calculate_risk_score(&quiet), 0);

        let mut busy = Account::new(addr(2), AccountType::Eoa, now);
        busy.transaction_count = 150;
        busy.contract_interaction_count = 100;
        busy.last_activity = now + Duration::hours(2);
        assert_eq!(service.calculate_risk_score(&busy), 5);

        // Volume spread over more than a day is not high volume
        busy.last_activity = now + Duration::hours(48);
        assert_eq!(service.calculate_risk_score(&busy), 2);
    }

    #[tokio::test]
    async fn discover_detects_smart_account() {
        let mut proxy = EIP1167_PREFIX.to_vec();
        proxy.extend_from_slice(&[0xcc; 20]);
        proxy.extend_from_slice(&EIP1167_SUFFIX);
        let chain = StaticChain::new()
            .with_code(addr(1), Bytes(proxy))
            .with_balance(addr(1), 500, 3);
        let (repos, service) = service(chain);

        let account = service.discover_account(&addr(1)).await.unwrap();
        assert_eq!(account.account_type, AccountType::SmartAccount);
        assert_eq!(account.implementation, Some(addr(0xcc)));
        assert_eq!(account.balance, 500);
        assert_eq!(account.nonce, 3);
        assert_eq!(repos.account_count(), 1);

        // Second call returns the stored record
        service.discover_account(&addr(1)).await.unwrap();
        assert_eq!(repos.account_count(), 1);
    }

    // Test critique: création idempotente
    #[tokio::test]
    async fn create_account_is_idempotent() {
        let (repos, service) = service(StaticChain::new());
        let mut new = NewAccount::new(addr(1), AccountType::Eoa);
        new.label = Some("treasury".into());
        new.risk_score = Some(4);

        assert!(service.create_account(new.clone()).await.unwrap());
        new.label = Some("other".into());
        assert!(!service.create_account(new).await.unwrap());

        let stored = repos.accounts().get_account(&addr(1)).await.unwrap().unwrap();
        assert_eq!(stored.label.as_deref(), Some("treasury"));
        assert_eq!(stored.compliance_status, ComplianceStatus::UnderReview);
        assert_eq!(repos.account_count(), 1);
    }

    #[tokio::test]
    async fn transaction_updates_sender_and_recipient() {
        let chain = StaticChain::new().with_code(addr(2), Bytes(vec![0x60, 0x80]));
        let (repos, service) = service(chain);

        service
            .process_transaction_for_accounts(&transfer(addr(1), Some(addr(2))))
            .await
            .unwrap();

        let sender = repos.accounts().get_account(&addr(1)).await.unwrap().unwrap();
        let recipient = repos.accounts().get_account(&addr(2)).await.unwrap().unwrap();
        assert_eq!(sender.transaction_count, 1);
        assert_eq!(sender.contract_interaction_count, 1);
        assert_eq!(sender.nonce, 5);
        assert_eq!(recipient.transaction_count, 1);
        assert!(recipient.is_smart_account());
    }

    #[tokio::test]
    async fn contract_creation_promotes_created_address() {
        let (repos, service) = service(StaticChain::new());
        let mut tx = transfer(addr(1), None);
        tx.contract_address = Some(addr(9));

        service.process_transaction_for_accounts(&tx).await.unwrap();

        let sender = repos.accounts().get_account(&addr(1)).await.unwrap().unwrap();
        let created = repos.accounts().get_account(&addr(9)).await.unwrap().unwrap();
        assert_eq!(sender.contract_deployment_count, 1);
        assert!(created.is_smart_account());
    }

    #[tokio::test]
    async fn self_transfer_counts_once() {
        let (repos, service) = service(StaticChain::new());
        service
            .process_transaction_for_accounts(&transfer(addr(1), Some(addr(1))))
            .await
            .unwrap();
        let account = repos.accounts().get_account(&addr(1)).await.unwrap().unwrap();
        assert_eq!(account.transaction_count, 1);
    }

    #[tokio::test]
    async fn bulk_operations_skip_unknown_addresses() {
        let (_, service) = service(StaticChain::new());
        let created = service
            .bulk_create_accounts(vec![
                NewAccount::new(addr(1), AccountType::Eoa),
                NewAccount::new(addr(2), AccountType::Eoa),
                NewAccount::new(addr(1), AccountType::Eoa),
            ])
            .await
            .unwrap();
        assert_eq!(created, 2);

        let tags = vec!["exchange".to_string()];
        let updated = service
            .bulk_update_tags(&[addr(1), addr(2), addr(3)], &tags)
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let flagged = service
            .bulk_update_compliance(&[addr(2), addr(3)], ComplianceStatus::Flagged)
            .await
            .unwrap();
        assert_eq!(flagged, 1);

        let analyzed = service.bulk_analyze_compliance(&[addr(2)]).await.unwrap();
        assert_eq!(analyzed[0].compliance_status, ComplianceStatus::Compliant);
    }

    #[tokio::test]
    async fn tag_updates_require_existing_account() {
        let (_, service) = service(StaticChain::new());
        let err = service
            .add_tags(&addr(5), &["vip".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AccountNotFound(_)));

        service
            .create_account(NewAccount::new(addr(5), AccountType::Eoa))
            .await
            .unwrap();
        service.update_tags(&addr(5), &["a".to_string()]).await.unwrap();
        let account = service.add_tags(&addr(5), &["b".to_string(), "a".to_string()]).await.unwrap();
        assert_eq!(account.tags, vec!["a", "b"]);
    }

    // Test critique: les tags relus sont les mêmes, quel que soit l'ordre
    #[tokio::test]
    async fn tags_round_trip_ignoring_order() {
        let (repos, service) = service(StaticChain::new());
        service
            .create_account(NewAccount::new(addr(6), AccountType::Eoa))
            .await
            .unwrap();
        let tags = vec!["whale".to_string(), "Exchange".to_string(), "whale".to_string()];
        service.update_tags(&addr(6), &tags).await.unwrap();

        let stored = repos.accounts().get_account(&addr(6)).await.unwrap().unwrap();
        let mut read: Vec<String> = stored.tags.clone();
        read.sort();
        assert_eq!(read, vec!["exchange", "whale"]);
    }

    #[tokio::test]
    async fn promote_existing_eoa() {
        let (_, service) = service(StaticChain::new());
        service
            .create_account(NewAccount::new(addr(4), AccountType::Eoa))
            .await
            .unwrap();
        let promoted = service
            .promote_to_smart_account(&addr(4), Some(addr(8)))
            .await
            .unwrap();
        assert!(promoted.is_smart_account());
        assert_eq!(promoted.implementation, Some(addr(8)));
    }
}
