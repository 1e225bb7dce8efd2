//! Queue consumer loop shared by every queue-driven handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use chainlens_core::error::WorkerResult;
use chainlens_core::metrics::record_message_consumed;
use chainlens_core::ports::{Delivery, MessageQueue, QueueSpec, Worker};

/// How a delivery is settled after handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed, or malformed and deliberately discarded.
    Ack,
    /// Transient failure; redeliver.
    Requeue,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ack => "ack",
            Outcome::Requeue => "requeue",
        }
    }
}

/// Processes the messages of one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Worker name used in logs and the supervisor.
    fn name(&self) -> &'static str;

    /// Queue this handler consumes.
    fn queue(&self) -> &str;

    async fn handle(&self, body: &[u8]) -> Outcome;

    /// Called once after the consume loop stops.
    async fn on_shutdown(&self) {}
}

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Fixed delay before resubscribing after a declare or consume failure.
    pub retry_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Runs a [`MessageHandler`] against a queue until shutdown.
///
/// # Flow
///
/// 1. Declare the queue and subscribe
/// 2. Hand each delivery to the handler and settle it with the outcome
/// 3. On declare/consume failure or a broken stream, wait
///    `retry_interval` and start over
pub struct QueueConsumer<Q: MessageQueue, H: MessageHandler> {
    queue: Arc<Q>,
    handler: Arc<H>,
    config: ConsumerConfig,
}

impl<Q: MessageQueue, H: MessageHandler> QueueConsumer<Q, H> {
    pub fn new(queue: Arc<Q>, handler: Arc<H>, config: ConsumerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Consume until the subscription breaks (`Ok(false)`) or shutdown
    /// is requested (`Ok(true)`).
    async fn consume_once(&self, shutdown: &mut watch::Receiver<bool>) -> WorkerResult<bool> {
        let queue_name = self.handler.queue();
        self.queue
            .declare_queue(&QueueSpec::durable(queue_name))
            .await?;
        let mut stream = self.queue.consume(queue_name).await?;
        info!(queue = queue_name, "📡 Subscribed");

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.process(delivery).await,
                    Some(Err(e)) => {
                        warn!(queue = queue_name, error = %e, "⚠️  Subscription error, reconnecting...");
                        return Ok(false);
                    }
                    None => {
                        warn!(queue = queue_name, "⚠️  Subscription closed, reconnecting...");
                        return Ok(false);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(true);
                    }
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        let queue_name = self.handler.queue();
        let outcome = self.handler.handle(&delivery.body).await;
        record_message_consumed(queue_name, outcome.as_str());

        let settled = match outcome {
            Outcome::Ack => delivery.ack().await,
            Outcome::Requeue => delivery.nack(true).await,
        };
        if let Err(e) = settled {
            warn!(queue = queue_name, outcome = outcome.as_str(), error = %e, "⚠️  Failed to settle delivery");
        }
    }
}

#[async_trait]
impl<Q: MessageQueue, H: MessageHandler> Worker for QueueConsumer<Q, H> {
    fn name(&self) -> &'static str {
        self.handler.name()
    }

    #[instrument(skip_all, fields(queue = %self.handler.queue()))]
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        info!("🚀 Starting consumer");

        while !*shutdown.borrow() {
            match self.consume_once(&mut shutdown).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_ms = self.config.retry_interval.as_millis(),
                        "⚠️  Failed to subscribe, retrying..."
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_interval) => {
                    debug!("🔄 Resubscribing");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.handler.on_shutdown().await;
        info!("🛑 Consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlens_core::testing::MemoryQueue;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<Vec<u8>>>,
        requeue_marker: &'static [u8],
        shutdown_called: Mutex<bool>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                requeue_marker: b"retry",
                shutdown_called: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn queue(&self) -> &str {
            "events"
        }

        async fn handle(&self, body: &[u8]) -> Outcome {
            self.seen.lock().push(body.to_vec());
            if body == self.requeue_marker {
                Outcome::Requeue
            } else {
                Outcome::Ack
            }
        }

        async fn on_shutdown(&self) {
            *self.shutdown_called.lock() = true;
        }
    }

    fn consumer(queue: &MemoryQueue, handler: Arc<Recorder>) -> QueueConsumer<MemoryQueue, Recorder> {
        QueueConsumer::new(
            Arc::new(queue.clone()),
            handler,
            ConsumerConfig {
                retry_interval: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_by_outcome() {
        let queue = MemoryQueue::new();
        queue.push("events", "ok");
        queue.push("events", "retry");
        let handler = Arc::new(Recorder::new());
        let worker = consumer(&queue, handler.clone());

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert!(queue.is_declared("events"));
        assert_eq!(queue.acked("events"), vec![b"ok".to_vec()]);
        assert_eq!(queue.requeued("events"), vec![b"retry".to_vec()]);
        assert!(*handler.shutdown_called.lock());
    }

    // Test critique: un échec d'abonnement attend l'intervalle fixe puis réessaie
    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_fixed_interval() {
        let queue = MemoryQueue::new();
        queue.fail_next_consumes(2);
        queue.push("events", "late");
        let handler = Arc::new(Recorder::new());
        let worker = consumer(&queue, handler.clone());

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(queue.consume_calls(), 1);
        assert!(handler.seen.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.consume_calls(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.consume_calls(), 3);
        assert_eq!(queue.acked("events"), vec![b"late".to_vec()]);

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_retry_wait() {
        let queue = MemoryQueue::new();
        queue.fail_next_consumes(usize::MAX);
        let worker = consumer(&queue, Arc::new(Recorder::new()));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(queue.consume_calls(), 1);
    }
}
