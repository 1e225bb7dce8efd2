//! Block ingestion: enrich, buffer, flush.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use chainlens_core::cache::{CacheStore, NetworkThroughput};
use chainlens_core::error::ChainResult;
use chainlens_core::metrics::{
    ProcessingTimer, record_batch_flush, record_batch_flush_failure, record_block_batched,
};
use chainlens_core::models::{Block, H256, SmartContract, Transaction, TransactionStatus};
use chainlens_core::ports::{BlockBatchData, ChainBlock, ChainClient, Receipt, Repositories};
use chainlens_core::services::AccountService;

use super::batcher::{BatchConfig, BatchSink, Batcher, FlushTrigger};
use super::payload::BlockEvent;
use crate::consumer::{MessageHandler, Outcome};

/// One buffered block with its mined transactions.
#[derive(Debug, Clone)]
pub struct BlockBatchItem {
    pub block: Block,
    pub transactions: Vec<Transaction>,
}

// =============================================================================
// Flush
// =============================================================================

/// Persists block batches and refreshes the batch-scoped cache entries.
pub struct BlockFlusher<R: Repositories, C: ChainClient> {
    repositories: Arc<R>,
    accounts: AccountService<R, C>,
    cache: CacheStore,
}

impl<R: Repositories, C: ChainClient> BlockFlusher<R, C> {
    pub fn new(repositories: Arc<R>, chain: Arc<C>, cache: CacheStore) -> Self {
        Self {
            accounts: AccountService::new(repositories.clone(), chain),
            repositories,
            cache,
        }
    }

    async fn refresh_cache(&self, blocks: &[Block], transactions: &[Transaction]) {
        if let Some(latest) = blocks.iter().max_by_key(|b| b.number) {
            self.cache.set_latest_block(latest).await;
        }
        for block in blocks {
            self.cache.set_block(block).await;
        }
        for tx in transactions {
            self.cache.set_transaction(tx).await;
        }
        if let Some(throughput) = NetworkThroughput::estimate(blocks) {
            self.cache.set_throughput(&throughput).await;
        }
    }
}

/// Contracts deployed by the successful creations among `transactions`.
fn contract_creations(transactions: &[Transaction]) -> Vec<SmartContract> {
    transactions
        .iter()
        .filter(|tx| tx.status == TransactionStatus::Success)
        .filter_map(|tx| {
            Some(SmartContract::created_by(
                tx.contract_address?,
                tx.from,
                tx.hash,
                tx.block_number?,
                tx.timestamp?,
            ))
        })
        .collect()
}

#[async_trait]
impl<R, C> BatchSink<BlockBatchItem> for BlockFlusher<R, C>
where
    R: Repositories + 'static,
    C: ChainClient + 'static,
{
    #[instrument(skip_all, fields(trigger = trigger.as_str(), size = items.len()))]
    async fn flush(&self, items: Vec<BlockBatchItem>, trigger: FlushTrigger) {
        let size = items.len();
        record_batch_flush(trigger.as_str(), size);

        let mut blocks = Vec::with_capacity(size);
        let mut transactions = Vec::new();
        for item in items {
            blocks.push(item.block);
            transactions.extend(item.transactions);
        }
        let from = blocks.iter().map(|b| b.number).min().unwrap_or_default();
        let to = blocks.iter().map(|b| b.number).max().unwrap_or_default();
        let contracts = contract_creations(&transactions);

        // Account counters are not upserts: only transactions stored for the
        // first time by this batch may touch them.
        let hashes: Vec<H256> = transactions.iter().map(|tx| tx.hash).collect();
        let mut seen: HashSet<H256> = match self
            .repositories
            .transactions()
            .check_exists_batch(&hashes)
            .await
        {
            Ok(stored) => stored.into_iter().collect(),
            Err(e) => {
                error!(from, to, size, error = %e, "❌ Block batch lookup failed, batch dropped");
                record_batch_flush_failure(size);
                return;
            }
        };

        let data = BlockBatchData {
            blocks: &blocks,
            transactions: &transactions,
            contracts: &contracts,
        };
        if let Err(e) = self.repositories.persist_block_batch_atomic(data).await {
            // TODO: park failed batches on a retry list instead of dropping them
            error!(from, to, size, error = %e, "❌ Block batch flush failed, batch dropped");
            record_batch_flush_failure(size);
            return;
        }

        let replayed = seen.len();
        for tx in transactions.iter().filter(|tx| seen.insert(tx.hash)) {
            if let Err(e) = self.accounts.process_transaction_for_accounts(tx).await {
                warn!(tx = %tx.hash, error = %e, "⚠️  Account update failed");
            }
        }

        self.refresh_cache(&blocks, &transactions).await;

        info!(
            from,
            to,
            transactions = transactions.len(),
            contracts = contracts.len(),
            replayed,
            "📦 Block batch persisted"
        );
    }
}

// =============================================================================
// Handler
// =============================================================================

/// Consumes new-block events.
///
/// # Flow
///
/// 1. Decode the event (structured, legacy or bare number)
/// 2. Fetch the full block and its receipts from the node, falling back to
///    the event's own fields when the node can't serve it
/// 3. Buffer the block for batched persistence
/// 4. Write the latest-pointer and block cache entries right away
/// 5. Ack
pub struct BlockHandler<R: Repositories + 'static, C: ChainClient + 'static> {
    queue: String,
    chain: Arc<C>,
    cache: CacheStore,
    batcher: Batcher<BlockBatchItem, BlockFlusher<R, C>>,
}

impl<R: Repositories + 'static, C: ChainClient + 'static> BlockHandler<R, C> {
    pub fn new(
        queue: impl Into<String>,
        repositories: Arc<R>,
        chain: Arc<C>,
        cache: CacheStore,
        batch: BatchConfig,
    ) -> Self {
        let flusher = BlockFlusher::new(repositories, chain.clone(), cache.clone());
        Self {
            queue: queue.into(),
            chain,
            cache,
            batcher: Batcher::new(flusher, batch),
        }
    }

    /// Blocks currently buffered.
    pub fn buffered(&self) -> usize {
        self.batcher.len()
    }

    /// Full block with transactions settled from their receipts.
    async fn fetch(&self, number: u64) -> ChainResult<Option<BlockBatchItem>> {
        let Some(ChainBlock {
            block,
            mut transactions,
        }) = self.chain.block_by_number(number).await?
        else {
            return Ok(None);
        };

        let receipts: HashMap<H256, Receipt> = if transactions.is_empty() {
            HashMap::new()
        } else {
            match self.chain.block_receipts(number).await {
                Ok(receipts) => receipts
                    .into_iter()
                    .map(|r| (r.transaction_hash, r))
                    .collect(),
                Err(e) => {
                    warn!(block = number, error = %e, "⚠️  Receipts unavailable, settling without them");
                    HashMap::new()
                }
            }
        };

        for (position, tx) in transactions.iter_mut().enumerate() {
            let index = tx.transaction_index.unwrap_or(position as u32);
            let outcome = receipts.get(&tx.hash).map(Receipt::outcome);
            tx.mark_mined(block.number, block.hash, index, block.timestamp, outcome);
        }

        Ok(Some(BlockBatchItem {
            block,
            transactions,
        }))
    }
}

#[async_trait]
impl<R: Repositories + 'static, C: ChainClient + 'static> MessageHandler for BlockHandler<R, C> {
    fn name(&self) -> &'static str {
        "blocks"
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, body: &[u8]) -> Outcome {
        let _timer = ProcessingTimer::new();

        let event = match BlockEvent::parse(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "⚠️  Discarding malformed block event");
                return Outcome::Ack;
            }
        };

        let fetched = match self.fetch(event.number).await {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                debug!(block = event.number, "Block not served by node yet");
                None
            }
            Err(e) => {
                warn!(block = event.number, error = %e, "⚠️  Block fetch failed, using event fields");
                None
            }
        };

        let item = match fetched {
            Some(item) => item,
            None => match event.fallback_block() {
                Some(block) => BlockBatchItem {
                    block,
                    transactions: Vec::new(),
                },
                None => {
                    warn!(block = event.number, "⚠️  Block unavailable and event has no hash, requeueing");
                    return Outcome::Requeue;
                }
            },
        };

        let block = item.block.clone();
        debug!(
            block = block.number,
            transactions = item.transactions.len(),
            "Block buffered"
        );
        record_block_batched();
        self.batcher.push(item).await;

        self.cache.set_latest_block(&block).await;
        self.cache.set_block(&block).await;

        Outcome::Ack
    }

    async fn on_shutdown(&self) {
        if !self.batcher.is_empty() {
            info!(buffered = self.batcher.len(), "💾 Flushing buffered blocks");
        }
        self.batcher.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chainlens_core::cache::CacheConfig;
    use chainlens_core::models::{Address, Bytes};
    use chainlens_core::ports::{
        AccountRepository, SmartContractRepository, TransactionRepository, Worker,
    };
    use chainlens_core::testing::{MemoryCache, MemoryQueue, MemoryRepositories, StaticChain};
    use chrono::{DateTime, Utc};
    use tokio::sync::watch;

    use crate::consumer::{ConsumerConfig, QueueConsumer};

    const BLOCK_HASH: [u8; 32] = [0xab; 32];

    struct Harness {
        repositories: Arc<MemoryRepositories>,
        chain: Arc<StaticChain>,
        backend: Arc<MemoryCache>,
        cache: CacheStore,
    }

    impl Harness {
        fn new(chain: StaticChain) -> Self {
            let backend = Arc::new(MemoryCache::new());
            Self {
                repositories: Arc::new(MemoryRepositories::new()),
                chain: Arc::new(chain),
                cache: CacheStore::new(backend.clone(), CacheConfig::default()),
                backend,
            }
        }

        fn handler(&self, max_size: usize) -> BlockHandler<MemoryRepositories, StaticChain> {
            BlockHandler::new(
                "blocks",
                self.repositories.clone(),
                self.chain.clone(),
                self.cache.clone(),
                BatchConfig {
                    max_size,
                    max_delay: Duration::from_millis(5000),
                },
            )
        }
    }

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn pending_tx(hash: u8, from: Address, to: Option<Address>) -> Transaction {
        Transaction {
            hash: H256([hash; 32]),
            block_number: Some(100),
            block_hash: Some(H256(BLOCK_HASH)),
            transaction_index: None,
            from,
            to,
            value: 5,
            gas_limit: 100_000,
            gas_used: None,
            gas_price: Some(1),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            nonce: 0,
            input: Bytes::default(),
            status: TransactionStatus::Pending,
            contract_address: None,
            timestamp: Some(ts()),
        }
    }

    fn event_body() -> Vec<u8> {
        serde_json::json!({
            "number": 100,
            "hash": H256(BLOCK_HASH).to_hex(),
            "timestamp": 1_700_000_000
        })
        .to_string()
        .into_bytes()
    }

    // Test critique: scénario de bout en bout, un pointeur "latest" puis un seul flush
    #[tokio::test(start_paused = true)]
    async fn test_block_event_end_to_end() {
        let harness = Harness::new(StaticChain::new());
        let queue = MemoryQueue::new();
        let handler = Arc::new(harness.handler(10));
        let worker = QueueConsumer::new(
            Arc::new(queue.clone()),
            handler.clone(),
            ConsumerConfig::default(),
        );

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { worker.run(rx).await });

        queue.push("blocks", event_body());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let latest_key = harness.cache.latest_block_key();
        assert_eq!(harness.backend.writes_to(&latest_key), 1);
        let latest = harness.backend.get_json(&latest_key).unwrap();
        assert_eq!(latest["number"], 100);
        assert_eq!(queue.acked("blocks").len(), 1);
        assert_eq!(harness.repositories.block_batch_calls(), 0);
        assert_eq!(handler.buffered(), 1);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(harness.repositories.block_batch_calls(), 1);
        assert_eq!(harness.repositories.block_count(), 1);
        assert_eq!(handler.buffered(), 0);

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(harness.repositories.block_batch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_block_settles_transactions_and_contracts() {
        let sender = Address([0x01; 20]);
        let recipient = Address([0x02; 20]);
        let deployed = Address([0x03; 20]);

        let mut block = Block::from_summary(100, H256(BLOCK_HASH), ts());
        block.transaction_count = 2;
        let transfer = pending_tx(0x10, sender, Some(recipient));
        let creation = pending_tx(0x11, sender, None);
        let receipts = vec![
            Receipt {
                transaction_hash: transfer.hash,
                success: false,
                gas_used: 21_000,
                contract_address: None,
            },
            Receipt {
                transaction_hash: creation.hash,
                success: true,
                gas_used: 90_000,
                contract_address: Some(deployed),
            },
        ];
        let chain = StaticChain::new().with_block(
            ChainBlock {
                block,
                transactions: vec![transfer.clone(), creation.clone()],
            },
            receipts,
        );
        let harness = Harness::new(chain);
        let handler = harness.handler(1);

        assert_eq!(handler.handle(b"100").await, Outcome::Ack);
        assert_eq!(harness.repositories.block_batch_calls(), 1);

        let txs = harness.repositories.transactions();
        let stored = txs.get_transaction(&transfer.hash).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.transaction_index, Some(0));
        let stored = txs.get_transaction(&creation.hash).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(stored.contract_address, Some(deployed));
        assert_eq!(stored.gas_used, Some(90_000));

        let contract = harness
            .repositories
            .contracts()
            .get_contract(&deployed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contract.creator, Some(sender));
        assert_eq!(contract.creation_block, Some(100));

        let accounts = harness.repositories.accounts();
        let sender_account = accounts.get_account(&sender).await.unwrap().unwrap();
        assert_eq!(sender_account.transaction_count, 2);
        assert_eq!(sender_account.contract_deployment_count, 1);
        let deployed_account = accounts.get_account(&deployed).await.unwrap().unwrap();
        assert!(deployed_account.is_smart_account());

        assert!(harness
            .backend
            .get(&harness.cache.transaction_key(&creation.hash))
            .is_some());
        assert!(harness
            .backend
            .get(&harness.cache.throughput_key())
            .is_some());
    }

    fn replay_harness() -> (Harness, Address) {
        let sender = Address([0x01; 20]);
        let mut block = Block::from_summary(100, H256(BLOCK_HASH), ts());
        block.transaction_count = 1;
        let transfer = pending_tx(0x10, sender, Some(Address([0x02; 20])));
        let receipts = vec![Receipt {
            transaction_hash: transfer.hash,
            success: true,
            gas_used: 21_000,
            contract_address: None,
        }];
        let chain = StaticChain::new().with_block(
            ChainBlock {
                block,
                transactions: vec![transfer],
            },
            receipts,
        );
        (Harness::new(chain), sender)
    }

    // Test critique: un bloc rejoué (redelivery) ne recompte pas les transactions des comptes
    #[tokio::test(start_paused = true)]
    async fn test_replayed_block_does_not_recount_accounts() {
        let (harness, sender) = replay_harness();
        let handler = harness.handler(1);

        assert_eq!(handler.handle(b"100").await, Outcome::Ack);
        assert_eq!(handler.handle(b"100").await, Outcome::Ack);
        assert_eq!(harness.repositories.block_batch_calls(), 2);

        let account = harness
            .repositories
            .accounts()
            .get_account(&sender)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.transaction_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_block_in_one_batch_counts_once() {
        let (harness, sender) = replay_harness();
        let handler = harness.handler(2);

        handler.handle(b"100").await;
        handler.handle(b"100").await;
        assert_eq!(harness.repositories.block_batch_calls(), 1);

        let account = harness
            .repositories
            .accounts()
            .get_account(&sender)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.transaction_count, 1);
    }

    // Test critique: un événement plus ancien ne fait pas reculer le pointeur "latest"
    #[tokio::test(start_paused = true)]
    async fn test_older_block_keeps_latest_pointer() {
        let harness = Harness::new(StaticChain::new());
        let handler = harness.handler(10);
        let event = |number: u64, hash: u8| {
            serde_json::json!({
                "number": number,
                "hash": H256([hash; 32]).to_hex(),
                "timestamp": 1_700_000_000
            })
            .to_string()
            .into_bytes()
        };

        handler.handle(&event(101, 0x01)).await;
        handler.handle(&event(100, 0x02)).await;
        handler.on_shutdown().await;

        let latest = harness
            .backend
            .get_json(&harness.cache.latest_block_key())
            .unwrap();
        assert_eq!(latest["number"], 101);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bare_number_without_node_is_requeued() {
        let harness = Harness::new(StaticChain::new());
        harness.chain.fail_all(true);
        let handler = harness.handler(10);

        assert_eq!(handler.handle(b"\"0x64\"").await, Outcome::Requeue);
        assert_eq!(handler.buffered(), 0);
        assert!(harness.backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_event_is_acked_and_dropped() {
        let harness = Harness::new(StaticChain::new());
        let handler = harness.handler(10);

        assert_eq!(handler.handle(b"{\"hash\": \"0x01\"}").await, Outcome::Ack);
        assert_eq!(handler.buffered(), 0);
        assert!(harness.backend.is_empty());
    }

    // Test critique: un échec de flush abandonne le lot sans bloquer l'ack
    #[tokio::test(start_paused = true)]
    async fn test_flush_failure_drops_batch() {
        let harness = Harness::new(StaticChain::new());
        harness.repositories.fail_writes(true);
        let handler = harness.handler(1);

        assert_eq!(handler.handle(&event_body()).await, Outcome::Ack);
        assert_eq!(harness.repositories.block_batch_calls(), 0);
        assert_eq!(handler.buffered(), 0);
        // Instant tier still written
        assert_eq!(
            harness.backend.writes_to(&harness.cache.latest_block_key()),
            1
        );

        harness.repositories.fail_writes(false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(harness.repositories.block_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_failure_does_not_block_ack() {
        let harness = Harness::new(StaticChain::new());
        harness.backend.fail_writes(true);
        let handler = harness.handler(1);

        assert_eq!(handler.handle(&event_body()).await, Outcome::Ack);
        assert_eq!(harness.repositories.block_batch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_partial_batch() {
        let harness = Harness::new(StaticChain::new());
        let handler = harness.handler(10);

        handler.handle(&event_body()).await;
        assert_eq!(harness.repositories.block_batch_calls(), 0);

        handler.on_shutdown().await;
        assert_eq!(harness.repositories.block_batch_calls(), 1);
    }

    #[test]
    fn test_failed_creation_registers_no_contract() {
        let mut failed = pending_tx(0x20, Address([0x01; 20]), None);
        failed.status = TransactionStatus::Failed;
        failed.contract_address = Some(Address([0x09; 20]));
        let mut ok = failed.clone();
        ok.status = TransactionStatus::Success;

        assert!(contract_creations(&[failed]).is_empty());
        assert_eq!(contract_creations(&[ok]).len(), 1);
    }
}
