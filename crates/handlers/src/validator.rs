//! Periodic validator set sync.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use chainlens_core::error::WorkerResult;
use chainlens_core::metrics::record_validator_sync;
use chainlens_core::models::Validator;
use chainlens_core::ports::{ChainClient, MessageQueue, Repositories, Worker};
use chainlens_core::services::ValidatorService;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub poll_interval: Duration,
    /// Queue the summary event is published to.
    pub updates_queue: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            updates_queue: "validator_updates".to_string(),
        }
    }
}

// =============================================================================
// Summary event
// =============================================================================

#[derive(Debug, Serialize)]
struct ValidatorSummary {
    address: String,
    proposed_block_count: String,
    last_proposed_block: String,
    status: &'static str,
    uptime: f64,
}

#[derive(Debug, Serialize)]
struct ValidatorsUpdate {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    validators: Vec<ValidatorSummary>,
}

impl ValidatorsUpdate {
    fn new(validators: &[Validator], at: DateTime<Utc>) -> Self {
        Self {
            kind: "validators_update",
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            validators: validators
                .iter()
                .map(|v| ValidatorSummary {
                    address: v.address.to_hex(),
                    proposed_block_count: v.proposed_block_count.to_string(),
                    last_proposed_block: v.last_proposed_block.to_string(),
                    status: v.status.as_str(),
                    uptime: v.uptime,
                })
                .collect(),
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Reconciles the validator set on a fixed interval and announces it.
pub struct ValidatorWorker<R: Repositories, C: ChainClient, Q: MessageQueue> {
    service: ValidatorService<R, C>,
    queue: Arc<Q>,
    config: ValidatorConfig,
}

impl<R: Repositories, C: ChainClient, Q: MessageQueue> ValidatorWorker<R, C, Q> {
    pub fn new(repositories: Arc<R>, chain: Arc<C>, queue: Arc<Q>, config: ValidatorConfig) -> Self {
        Self {
            service: ValidatorService::new(repositories, chain),
            queue,
            config,
        }
    }

    /// One sync cycle. Failures are logged; the next tick retries.
    async fn sync_once(&self) {
        let active = match self.service.sync_validators().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "⚠️  Validator sync failed");
                record_validator_sync(false);
                return;
            }
        };
        record_validator_sync(true);
        info!(active = active.len(), "🛡️  Validator set synced");

        let update = ValidatorsUpdate::new(&active, Utc::now());
        let payload = match serde_json::to_vec(&update) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "⚠️  Failed to encode validator update");
                return;
            }
        };
        if let Err(e) = self.queue.publish(&self.config.updates_queue, &payload).await {
            warn!(queue = %self.config.updates_queue, error = %e, "⚠️  Failed to publish validator update");
        }
    }
}

#[async_trait]
impl<R, C, Q> Worker for ValidatorWorker<R, C, Q>
where
    R: Repositories,
    C: ChainClient,
    Q: MessageQueue,
{
    fn name(&self) -> &'static str {
        "validators"
    }

    #[instrument(skip_all)]
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "🚀 Starting validator sync"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Validator sync tick");
                    self.sync_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("🛑 Validator sync stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlens_core::models::{Address, SignerMetrics, ValidatorStatus};
    use chainlens_core::testing::{MemoryQueue, MemoryRepositories, StaticChain};
    use serde_json::Value;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    struct Harness {
        repos: Arc<MemoryRepositories>,
        chain: Arc<StaticChain>,
        queue: MemoryQueue,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                repos: Arc::new(MemoryRepositories::new()),
                chain: Arc::new(StaticChain::new()),
                queue: MemoryQueue::new(),
            }
        }

        fn worker(&self) -> ValidatorWorker<MemoryRepositories, StaticChain, MemoryQueue> {
            ValidatorWorker::new(
                self.repos.clone(),
                self.chain.clone(),
                Arc::new(self.queue.clone()),
                ValidatorConfig::default(),
            )
        }

        fn updates(&self) -> Vec<Value> {
            self.queue
                .published("validator_updates")
                .iter()
                .map(|body| serde_json::from_slice(body).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_summary_event_shape() {
        let harness = Harness::new();
        harness.chain.set_validators(
            vec![addr(0xa)],
            vec![SignerMetrics {
                address: addr(0xa),
                proposed_block_count: 12,
                last_proposed_block: 340,
            }],
        );

        harness.worker().sync_once().await;

        let updates = harness.updates();
        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update["type"], "validators_update");
        assert!(update["timestamp"].as_str().unwrap().ends_with('Z'));
        let v = &update["validators"][0];
        assert_eq!(v["address"], addr(0xa).to_hex());
        assert_eq!(v["proposed_block_count"], "12");
        assert_eq!(v["last_proposed_block"], "340");
        assert_eq!(v["status"], "active");
        assert_eq!(v["uptime"], 100.0);
    }

    // Test critique: un échec de publication n'annule pas la réconciliation
    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let harness = Harness::new();
        harness.chain.set_validators(vec![addr(1), addr(2)], vec![]);
        harness.queue.fail_publish(true);

        harness.worker().sync_once().await;

        assert_eq!(harness.repos.validator_reconcile_calls(), 1);
        assert!(
            harness
                .repos
                .all_validators()
                .iter()
                .all(|v| v.status == ValidatorStatus::Active)
        );
        assert!(harness.updates().is_empty());
    }

    #[tokio::test]
    async fn test_node_failure_publishes_nothing() {
        let harness = Harness::new();
        harness.chain.fail_all(true);

        harness.worker().sync_once().await;

        assert_eq!(harness.repos.validator_reconcile_calls(), 0);
        assert!(harness.updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate_then_fixed_interval() {
        let harness = Harness::new();
        harness.chain.set_validators(vec![addr(1)], vec![]);
        let worker = harness.worker();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.repos.validator_reconcile_calls(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.repos.validator_reconcile_calls(), 2);

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(harness.updates().len(), 2);
    }
}
