//! Validator set reconciliation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::error::DomainResult;
use crate::models::{Address, SignerMetrics, Validator, ValidatorStatus};
use crate::ports::{ChainClient, Repositories};

/// Uptime estimate in percent.
///
/// The signer's share of proposals in the observed window is compared to
/// its fair share `1 / active_count` and capped at 100.
pub fn estimate_uptime(proposed: u64, window_total: u64, active_count: usize) -> f64 {
    if window_total == 0 || active_count == 0 {
        return 0.0;
    }
    let share = proposed as f64 / window_total as f64;
    (share * active_count as f64 * 100.0).min(100.0)
}

pub struct ValidatorService<R: Repositories, C: ChainClient> {
    repositories: Arc<R>,
    chain: Arc<C>,
}

impl<R: Repositories, C: ChainClient> ValidatorService<R, C> {
    pub fn new(repositories: Arc<R>, chain: Arc<C>) -> Self {
        Self {
            repositories,
            chain,
        }
    }

    /// Fetch the authoritative validator set and make it the only active one.
    ///
    /// Signers without metrics get zero counters. Returns the active set as
    /// persisted.
    #[instrument(skip_all)]
    pub async fn sync_validators(&self) -> DomainResult<Vec<Validator>> {
        let addresses = self.chain.validator_addresses().await?;
        let metrics = match self.chain.signer_metrics().await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = %e, "⚠️  Signer metrics unavailable, defaulting to zero");
                Vec::new()
            }
        };

        let by_signer: HashMap<Address, SignerMetrics> =
            metrics.iter().map(|m| (m.address, *m)).collect();
        let window_total: u64 = addresses
            .iter()
            .filter_map(|a| by_signer.get(a))
            .map(|m| m.proposed_block_count)
            .sum();

        let now = Utc::now();
        let mut active = Vec::with_capacity(addresses.len());
        for address in &addresses {
            let m = by_signer.get(address).copied().unwrap_or_default();
            let first_seen = self
                .repositories
                .validators()
                .get_validator(address)
                .await?
                .map(|v| v.first_seen)
                .unwrap_or(now);

            active.push(Validator {
                address: *address,
                proposed_block_count: m.proposed_block_count,
                last_proposed_block: m.last_proposed_block,
                status: ValidatorStatus::Active,
                uptime: estimate_uptime(m.proposed_block_count, window_total, addresses.len()),
                first_seen,
                last_seen: now,
            });
        }

        self.repositories.reconcile_validators_atomic(&active).await?;
        debug!(active = active.len(), "Validator set reconciled");
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryRepositories, StaticChain};

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn metrics(a: Address, proposed: u64, last: u64) -> SignerMetrics {
        SignerMetrics {
            address: a,
            proposed_block_count: proposed,
            last_proposed_block: last,
        }
    }

    #[test]
    fn uptime_normalized_by_fair_share() {
        assert_eq!(estimate_uptime(50, 100, 2), 100.0);
        assert_eq!(estimate_uptime(25, 100, 2), 50.0);
        assert_eq!(estimate_uptime(80, 100, 2), 100.0);
        assert_eq!(estimate_uptime(0, 0, 3), 0.0);
    }

    // Test critique: réconciliation {A,C} -> {A,B}
    #[tokio::test]
    async fn reconcile_replaces_active_set() {
        let repos = Arc::new(MemoryRepositories::new());
        let chain = Arc::new(StaticChain::new());
        let service = ValidatorService::new(repos.clone(), chain.clone());

        chain.set_validators(vec![addr(0xa), addr(0xc)], vec![]);
        service.sync_validators().await.unwrap();

        chain.set_validators(
            vec![addr(0xa), addr(0xb)],
            vec![metrics(addr(0xa), 10, 99), metrics(addr(0xb), 10, 100)],
        );
        let active = service.sync_validators().await.unwrap();
        assert_eq!(active.len(), 2);

        let stored = repos.all_validators();
        let status = |a: Address| stored.iter().find(|v| v.address == a).unwrap().status;
        assert_eq!(status(addr(0xa)), ValidatorStatus::Active);
        assert_eq!(status(addr(0xb)), ValidatorStatus::Active);
        assert_eq!(status(addr(0xc)), ValidatorStatus::Inactive);
        assert_eq!(repos.validator_reconcile_calls(), 2);
    }

    #[tokio::test]
    async fn missing_metrics_default_to_zero() {
        let repos = Arc::new(MemoryRepositories::new());
        let chain = Arc::new(StaticChain::new());
        chain.set_validators(vec![addr(1), addr(2)], vec![metrics(addr(1), 4, 12)]);
        let service = ValidatorService::new(repos, chain);

        let active = service.sync_validators().await.unwrap();
        let missing = active.iter().find(|v| v.address == addr(2)).unwrap();
        assert_eq!(missing.proposed_block_count, 0);
        assert_eq!(missing.last_proposed_block, 0);
        assert_eq!(missing.uptime, 0.0);

        let present = active.iter().find(|v| v.address == addr(1)).unwrap();
        assert_eq!(present.uptime, 100.0);
    }

    #[tokio::test]
    async fn first_seen_survives_resync() {
        let repos = Arc::new(MemoryRepositories::new());
        let chain = Arc::new(StaticChain::new());
        chain.set_validators(vec![addr(1)], vec![]);
        let service = ValidatorService::new(repos.clone(), chain);

        let first = service.sync_validators().await.unwrap()[0].first_seen;
        let second = service.sync_validators().await.unwrap()[0].clone();
        assert_eq!(second.first_seen, first);
        assert!(second.last_seen >= first);
    }
}
