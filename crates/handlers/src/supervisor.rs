//! Worker supervisor: spawns every worker and joins them on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use chainlens_core::error::{WorkerError, WorkerResult};
use chainlens_core::ports::Worker;

/// Registry of long-running workers.
///
/// # Example
///
/// ```ignore
/// let mut supervisor = WorkerSupervisor::new(Duration::from_secs(30));
/// supervisor.register(Arc::new(block_consumer));
/// supervisor.register(Arc::new(validator_worker));
///
/// // Runs until `shutdown` flips, then waits for every worker
/// supervisor.run(shutdown_rx).await?;
/// ```
pub struct WorkerSupervisor {
    workers: Vec<Arc<dyn Worker>>,
    shutdown_timeout: Duration,
}

impl WorkerSupervisor {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            workers: Vec::new(),
            shutdown_timeout,
        }
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        info!(worker = worker.name(), "📦 Registering worker");
        self.workers.push(worker);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.workers.iter().map(|w| w.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Spawn every worker, wait for `shutdown`, then join them.
    ///
    /// Each worker gets `shutdown_timeout` to return once shutdown is
    /// requested. Workers still running after that are aborted and
    /// reported as failed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        let handles: Vec<(&'static str, JoinHandle<WorkerResult<()>>)> = self
            .workers
            .into_iter()
            .map(|worker| {
                let name = worker.name();
                let rx = shutdown.clone();
                let handle = tokio::spawn(
                    async move { worker.run(rx).await }.instrument(info_span!("worker", name)),
                );
                (name, handle)
            })
            .collect();
        info!(workers = handles.len(), "⚡ Workers started");

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        let mut failed = None;
        for (name, mut handle) in handles {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(Ok(()))) => debug!(worker = name, "Worker stopped"),
                Ok(Ok(Err(e))) => {
                    error!(worker = name, error = %e, "❌ Worker failed");
                    failed.get_or_insert(WorkerError::WorkerFailed {
                        name: name.to_string(),
                        message: e.to_string(),
                    });
                }
                Ok(Err(e)) => {
                    error!(worker = name, error = %e, "❌ Worker panicked");
                    failed.get_or_insert(WorkerError::WorkerFailed {
                        name: name.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(worker = name, "⚠️  Worker shutdown timed out, aborting");
                    handle.abort();
                    failed.get_or_insert(WorkerError::WorkerFailed {
                        name: name.to_string(),
                        message: "shutdown timed out".into(),
                    });
                }
            }
        }

        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Obedient(&'static str);

    #[async_trait]
    impl Worker for Obedient {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    struct Stubborn;

    #[async_trait]
    impl Worker for Stubborn {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        async fn run(&self, _shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[test]
    fn test_registration() {
        let mut supervisor = WorkerSupervisor::new(Duration::from_secs(1));
        assert!(supervisor.is_empty());
        supervisor.register(Arc::new(Obedient("blocks")));
        supervisor.register(Arc::new(Obedient("accounts")));
        assert_eq!(supervisor.len(), 2);
        assert_eq!(supervisor.names(), vec!["blocks", "accounts"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_shutdown() {
        let mut supervisor = WorkerSupervisor::new(Duration::from_secs(5));
        supervisor.register(Arc::new(Obedient("a")));
        supervisor.register(Arc::new(Obedient("b")));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        assert!(task.await.unwrap().is_ok());
    }

    // Test critique: un worker qui ignore l'arrêt ne bloque pas le processus
    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_is_aborted_after_timeout() {
        let mut supervisor = WorkerSupervisor::new(Duration::from_secs(5));
        supervisor.register(Arc::new(Obedient("a")));
        supervisor.register(Arc::new(Stubborn));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(WorkerError::WorkerFailed { ref name, .. }) if name == "stubborn"
        ));
    }
}
