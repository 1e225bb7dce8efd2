//! In-memory adapters for handler and service tests.
//!
//! Enabled with the `testing` feature. Every double records enough of
//! what it saw for assertions and can be switched into a failing mode.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{
    CacheError, CacheResult, ChainError, ChainResult, QueueError, QueueResult, StorageError,
    StorageResult,
};
use crate::models::{
    Account, Address, Block, Bytes, H256, SignerMetrics, SmartContract, Transaction, Validator,
    ValidatorStatus,
};
use crate::ports::{
    AccountRepository, Acknowledger, BlockBatchData, BlockRepository, ChainBlock, ChainClient,
    Delivery, DeliveryStream, KeyValueCache, MessageQueue, QueueSpec, Receipt, Repositories,
    SmartContractRepository, TransactionRepository, ValidatorRepository,
};

// =============================================================================
// Repositories
// =============================================================================

#[derive(Default)]
struct Tables {
    blocks: BTreeMap<u64, Block>,
    transactions: HashMap<H256, Transaction>,
    accounts: HashMap<Address, Account>,
    validators: BTreeMap<Address, Validator>,
    contracts: HashMap<Address, SmartContract>,
}

impl Tables {
    fn put_block(&mut self, block: &Block) {
        self.blocks.insert(block.number, block.clone());
    }

    fn put_transaction(&mut self, tx: &Transaction) {
        self.transactions.insert(tx.hash, tx.clone());
    }

    fn put_account(&mut self, account: &Account) {
        self.accounts.insert(account.address, account.clone());
    }

    fn put_validator(&mut self, validator: &Validator) {
        let mut next = validator.clone();
        if let Some(existing) = self.validators.get(&validator.address) {
            next.first_seen = existing.first_seen.min(validator.first_seen);
        }
        self.validators.insert(next.address, next);
    }

    fn put_contract(&mut self, contract: &SmartContract) {
        match self.contracts.get_mut(&contract.address) {
            Some(existing) => {
                let verification = contract.verification.clone();
                let mut next = contract.clone();
                next.verification = existing.verification.clone();
                next.merge_verification(verification);
                if next.creator.is_none() {
                    next.creator = existing.creator;
                    next.creation_tx_hash = existing.creation_tx_hash;
                    next.creation_block = existing.creation_block;
                    next.creation_timestamp = existing.creation_timestamp;
                }
                *existing = next;
            }
            None => {
                self.contracts.insert(contract.address, contract.clone());
            }
        }
    }
}

/// In-memory [`Repositories`] with failure injection.
#[derive(Default)]
pub struct MemoryRepositories {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    block_batches: AtomicUsize,
    validator_reconciles: AtomicUsize,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write return a query error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of atomic block batch persists that succeeded.
    pub fn block_batch_calls(&self) -> usize {
        self.block_batches.load(Ordering::SeqCst)
    }

    pub fn validator_reconcile_calls(&self) -> usize {
        self.validator_reconciles.load(Ordering::SeqCst)
    }

    pub fn block_count(&self) -> usize {
        self.tables.lock().blocks.len()
    }

    pub fn account_count(&self) -> usize {
        self.tables.lock().accounts.len()
    }

    pub fn all_validators(&self) -> Vec<Validator> {
        self.tables.lock().validators.values().cloned().collect()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QueryError("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockRepository for MemoryRepositories {
    async fn save(&self, block: &Block) -> StorageResult<()> {
        self.check_writable()?;
        self.tables.lock().put_block(block);
        Ok(())
    }

    async fn save_batch(&self, blocks: &[Block]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        blocks.iter().for_each(|b| tables.put_block(b));
        Ok(())
    }

    async fn check_exists_batch(&self, numbers: &[u64]) -> StorageResult<Vec<u64>> {
        let tables = self.tables.lock();
        Ok(numbers
            .iter()
            .copied()
            .filter(|n| tables.blocks.contains_key(n))
            .collect())
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        Ok(self.tables.lock().blocks.get(&number).cloned())
    }

    async fn get_block_by_hash(&self, hash: &H256) -> StorageResult<Option<Block>> {
        Ok(self
            .tables
            .lock()
            .blocks
            .values()
            .find(|b| &b.hash == hash)
            .cloned())
    }

    async fn latest_block_number(&self) -> StorageResult<Option<u64>> {
        Ok(self.tables.lock().blocks.keys().next_back().copied())
    }
}

#[async_trait]
impl TransactionRepository for MemoryRepositories {
    async fn save(&self, tx: &Transaction) -> StorageResult<()> {
        self.check_writable()?;
        self.tables.lock().put_transaction(tx);
        Ok(())
    }

    async fn save_batch(&self, txs: &[Transaction]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        txs.iter().for_each(|t| tables.put_transaction(t));
        Ok(())
    }

    async fn check_exists_batch(&self, hashes: &[H256]) -> StorageResult<Vec<H256>> {
        let tables = self.tables.lock();
        Ok(hashes
            .iter()
            .copied()
            .filter(|h| tables.transactions.contains_key(h))
            .collect())
    }

    async fn get_transaction(&self, hash: &H256) -> StorageResult<Option<Transaction>> {
        Ok(self.tables.lock().transactions.get(hash).cloned())
    }

    async fn list_for_block(&self, block_number: u64) -> StorageResult<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .tables
            .lock()
            .transactions
            .values()
            .filter(|t| t.block_number == Some(block_number))
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.transaction_index);
        Ok(txs)
    }
}

#[async_trait]
impl AccountRepository for MemoryRepositories {
    async fn save(&self, account: &Account) -> StorageResult<()> {
        self.check_writable()?;
        self.tables.lock().put_account(account);
        Ok(())
    }

    async fn save_batch(&self, accounts: &[Account]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        accounts.iter().for_each(|a| tables.put_account(a));
        Ok(())
    }

    async fn create_if_absent(&self, account: &Account) -> StorageResult<bool> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        if tables.accounts.contains_key(&account.address) {
            return Ok(false);
        }
        tables.put_account(account);
        Ok(true)
    }

    async fn check_exists_batch(&self, addresses: &[Address]) -> StorageResult<Vec<Address>> {
        let tables = self.tables.lock();
        Ok(addresses
            .iter()
            .copied()
            .filter(|a| tables.accounts.contains_key(a))
            .collect())
    }

    async fn get_account(&self, address: &Address) -> StorageResult<Option<Account>> {
        Ok(self.tables.lock().accounts.get(address).cloned())
    }

    async fn get_accounts(&self, addresses: &[Address]) -> StorageResult<Vec<Account>> {
        let tables = self.tables.lock();
        Ok(addresses
            .iter()
            .filter_map(|a| tables.accounts.get(a).cloned())
            .collect())
    }
}

#[async_trait]
impl ValidatorRepository for MemoryRepositories {
    async fn save(&self, validator: &Validator) -> StorageResult<()> {
        self.check_writable()?;
        self.tables.lock().put_validator(validator);
        Ok(())
    }

    async fn save_batch(&self, validators: &[Validator]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        validators.iter().for_each(|v| tables.put_validator(v));
        Ok(())
    }

    async fn get_validator(&self, address: &Address) -> StorageResult<Option<Validator>> {
        Ok(self.tables.lock().validators.get(address).cloned())
    }

    async fn list_validators(&self) -> StorageResult<Vec<Validator>> {
        let mut all: Vec<Validator> = self.tables.lock().validators.values().cloned().collect();
        all.sort_by_key(|v| (!v.is_active(), v.address));
        Ok(all)
    }
}

#[async_trait]
impl SmartContractRepository for MemoryRepositories {
    async fn save(&self, contract: &SmartContract) -> StorageResult<()> {
        self.check_writable()?;
        self.tables.lock().put_contract(contract);
        Ok(())
    }

    async fn save_batch(&self, contracts: &[SmartContract]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        contracts.iter().for_each(|c| tables.put_contract(c));
        Ok(())
    }

    async fn get_contract(&self, address: &Address) -> StorageResult<Option<SmartContract>> {
        Ok(self.tables.lock().contracts.get(address).cloned())
    }
}

#[async_trait]
impl Repositories for MemoryRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        self
    }

    fn transactions(&self) -> &dyn TransactionRepository {
        self
    }

    fn accounts(&self) -> &dyn AccountRepository {
        self
    }

    fn validators(&self) -> &dyn ValidatorRepository {
        self
    }

    fn contracts(&self) -> &dyn SmartContractRepository {
        self
    }

    async fn persist_block_batch_atomic(&self, data: BlockBatchData<'_>) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        data.blocks.iter().for_each(|b| tables.put_block(b));
        data.transactions.iter().for_each(|t| tables.put_transaction(t));
        data.contracts.iter().for_each(|c| tables.put_contract(c));
        self.block_batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reconcile_validators_atomic(&self, active: &[Validator]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        for validator in tables.validators.values_mut() {
            validator.status = ValidatorStatus::Inactive;
        }
        active.iter().for_each(|v| tables.put_validator(v));
        self.validator_reconciles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Cache
// =============================================================================

/// In-memory [`KeyValueCache`] that remembers TTLs and write counts.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Duration)>>,
    writes: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|(v, _)| v.clone())
    }

    /// Decode a stored value as JSON.
    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        self.get(key).and_then(|v| serde_json::from_str(&v).ok())
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().get(key).map(|(_, ttl)| *ttl)
    }

    /// Number of successful writes to `key`.
    pub fn writes_to(&self, key: &str) -> usize {
        self.writes.lock().iter().filter(|k| *k == key).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.get(key))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectionError("injected cache failure".into()));
        }
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), ttl));
        self.writes.lock().push(key.to_string());
        Ok(())
    }
}

// =============================================================================
// Queue
// =============================================================================

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    acked: Vec<Vec<u8>>,
    requeued: Vec<Vec<u8>>,
    dead: Vec<Vec<u8>>,
    published: Vec<Vec<u8>>,
    declared: bool,
}

#[derive(Default)]
struct QueueShared {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    consume_failures: AtomicUsize,
    fail_publish: AtomicBool,
    consume_calls: AtomicUsize,
}

/// In-memory [`MessageQueue`] with ack bookkeeping.
#[derive(Default, Clone)]
pub struct MemoryQueue {
    shared: Arc<QueueShared>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message as if an upstream publisher sent it.
    pub fn push(&self, queue: &str, body: impl Into<Vec<u8>>) {
        self.shared
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(body.into());
        self.shared.notify.notify_waiters();
    }

    /// Fail the next `n` calls to `consume`.
    pub fn fail_next_consumes(&self, n: usize) {
        self.shared.consume_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.shared.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn consume_calls(&self) -> usize {
        self.shared.consume_calls.load(Ordering::SeqCst)
    }

    pub fn is_declared(&self, queue: &str) -> bool {
        self.with(queue, |q| q.declared)
    }

    pub fn acked(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with(queue, |q| q.acked.clone())
    }

    pub fn requeued(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with(queue, |q| q.requeued.clone())
    }

    pub fn dead_lettered(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with(queue, |q| q.dead.clone())
    }

    pub fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with(queue, |q| q.published.clone())
    }

    pub fn pending(&self, queue: &str) -> usize {
        self.with(queue, |q| q.ready.len())
    }

    fn with<T>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        let mut queues = self.shared.queues.lock();
        f(queues.entry(queue.to_string()).or_default())
    }
}

struct MemoryAcker {
    shared: Arc<QueueShared>,
    queue: String,
    body: Vec<u8>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> QueueResult<()> {
        let MemoryAcker {
            shared,
            queue,
            body,
        } = *self;
        shared.queues.lock().entry(queue).or_default().acked.push(body);
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> QueueResult<()> {
        let MemoryAcker {
            shared,
            queue,
            body,
        } = *self;
        let mut queues = shared.queues.lock();
        let state = queues.entry(queue).or_default();
        if requeue {
            state.requeued.push(body);
        } else {
            state.dead.push(body);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn declare_queue(&self, spec: &QueueSpec) -> QueueResult<()> {
        self.shared
            .queues
            .lock()
            .entry(spec.name.clone())
            .or_default()
            .declared = true;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> QueueResult<DeliveryStream> {
        self.shared.consume_calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.shared.consume_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.shared
                .consume_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(QueueError::ConsumeFailed {
                queue: queue.to_string(),
                message: "injected consume failure".into(),
            });
        }

        let shared = self.shared.clone();
        let queue = queue.to_string();
        let stream = futures::stream::unfold((shared, queue), |(shared, queue)| async move {
            loop {
                let notified = shared.notify.notified();
                let next = shared
                    .queues
                    .lock()
                    .entry(queue.clone())
                    .or_default()
                    .ready
                    .pop_front();
                if let Some(body) = next {
                    drop(notified);
                    let acker = MemoryAcker {
                        shared: shared.clone(),
                        queue: queue.clone(),
                        body: body.clone(),
                    };
                    let delivery = Delivery::new(body, Box::new(acker));
                    return Some((Ok(delivery), (shared, queue)));
                }
                notified.await;
            }
        });
        Ok(Box::pin(stream))
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        if self.shared.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::PublishFailed {
                queue: queue.to_string(),
                message: "injected publish failure".into(),
            });
        }
        self.shared
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .published
            .push(payload.to_vec());
        Ok(())
    }
}

// =============================================================================
// Chain
// =============================================================================

#[derive(Default)]
struct ChainState {
    blocks: HashMap<u64, ChainBlock>,
    receipts: HashMap<u64, Vec<Receipt>>,
    code: HashMap<Address, Bytes>,
    balances: HashMap<Address, u128>,
    nonces: HashMap<Address, u64>,
    validators: Vec<Address>,
    signer_metrics: Vec<SignerMetrics>,
    fail_all: bool,
}

/// Scripted [`ChainClient`].
#[derive(Default)]
pub struct StaticChain {
    state: Mutex<ChainState>,
}

impl StaticChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(self, block: ChainBlock, receipts: Vec<Receipt>) -> Self {
        {
            let mut state = self.state.lock();
            state.receipts.insert(block.block.number, receipts);
            state.blocks.insert(block.block.number, block);
        }
        self
    }

    pub fn with_code(self, address: Address, code: Bytes) -> Self {
        self.state.lock().code.insert(address, code);
        self
    }

    pub fn with_balance(self, address: Address, balance: u128, nonce: u64) -> Self {
        {
            let mut state = self.state.lock();
            state.balances.insert(address, balance);
            state.nonces.insert(address, nonce);
        }
        self
    }

    pub fn set_validators(&self, validators: Vec<Address>, metrics: Vec<SignerMetrics>) {
        let mut state = self.state.lock();
        state.validators = validators;
        state.signer_metrics = metrics;
    }

    /// Make every call fail with a connection error.
    pub fn fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    fn check(&self) -> ChainResult<()> {
        if self.state.lock().fail_all {
            return Err(ChainError::ConnectionFailed("injected node failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for StaticChain {
    async fn block_by_number(&self, number: u64) -> ChainResult<Option<ChainBlock>> {
        self.check()?;
        Ok(self.state.lock().blocks.get(&number).cloned())
    }

    async fn block_receipts(&self, number: u64) -> ChainResult<Vec<Receipt>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .receipts
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn pending_nonce(&self, address: &Address) -> ChainResult<u64> {
        self.check()?;
        Ok(self.state.lock().nonces.get(address).copied().unwrap_or(0))
    }

    async fn balance(&self, address: &Address) -> ChainResult<u128> {
        self.check()?;
        Ok(self.state.lock().balances.get(address).copied().unwrap_or(0))
    }

    async fn code_at(&self, address: &Address) -> ChainResult<Bytes> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .code
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn validator_addresses(&self) -> ChainResult<Vec<Address>> {
        self.check()?;
        Ok(self.state.lock().validators.clone())
    }

    async fn signer_metrics(&self) -> ChainResult<Vec<SignerMetrics>> {
        self.check()?;
        Ok(self.state.lock().signer_metrics.clone())
    }
}
