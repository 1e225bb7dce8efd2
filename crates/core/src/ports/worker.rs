//! Port trait for long-running ingestion workers.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::WorkerResult;

/// A long-running consumer or ticker.
///
/// `run` returns once `shutdown` flips to `true`; infrastructure failures
/// are retried internally and never end the worker.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, shutdown: watch::Receiver<bool>) -> WorkerResult<()>;
}
