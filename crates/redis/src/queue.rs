//! Reliable queue on Redis lists.
//!
//! Layout per queue `q`:
//!
//! ```text
//!   publish ──LPUSH──► q ──BLMOVE──► q:processing ──LREM──► (acked)
//!                      ▲                  │
//!                      └──── nack(true) ──┤
//!                                         └── nack(false) ──► q:dead
//! ```
//!
//! A message stays in `q:processing` until it is settled. Declaring a queue
//! moves anything stranded there back onto `q`, so a worker that died
//! between receive and ack loses nothing. This assumes one consuming
//! process per queue.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tracing::{debug, info, instrument, warn};

use chainlens_core::error::{QueueError, QueueResult};
use chainlens_core::ports::{Acknowledger, Delivery, DeliveryStream, MessageQueue, QueueSpec};

/// Hash of declared queue names to their durability flag.
pub const QUEUE_REGISTRY_KEY: &str = "chainlens:queues";

const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(1);

fn processing_key(queue: &str) -> String {
    format!("{queue}:processing")
}

fn dead_letter_key(queue: &str) -> String {
    format!("{queue}:dead")
}

/// [`MessageQueue`] over Redis lists.
#[derive(Clone)]
pub struct RedisQueue {
    client: redis::Client,
    conn: ConnectionManager,
    block_timeout: Duration,
}

impl RedisQueue {
    /// Connect and verify the server answers.
    #[instrument(skip_all)]
    pub async fn connect(client: redis::Client) -> QueueResult<Self> {
        let mut conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionError(e.to_string()))?;

        crate::ping(&mut conn)
            .await
            .map_err(|e| QueueError::ConnectionError(format!("ping failed: {e}")))?;

        info!("📬 Redis queue connected");
        Ok(Self {
            client,
            conn,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
        })
    }

    /// How long one `BLMOVE` waits before polling again.
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Move everything left in `q:processing` back onto `q`, oldest first.
    async fn recover_in_flight(&self, queue: &str) -> redis::RedisResult<u64> {
        let mut conn = self.conn.clone();
        let processing = processing_key(queue);
        let mut recovered = 0u64;

        loop {
            let moved: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&processing)
                .arg(queue)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        Ok(recovered)
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    #[instrument(skip_all, fields(queue = %spec.name))]
    async fn declare_queue(&self, spec: &QueueSpec) -> QueueResult<()> {
        let declare_failed = |e: redis::RedisError| QueueError::DeclareFailed {
            queue: spec.name.clone(),
            message: e.to_string(),
        };

        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(QUEUE_REGISTRY_KEY, &spec.name, spec.durable)
            .await
            .map_err(declare_failed)?;

        let recovered = self
            .recover_in_flight(&spec.name)
            .await
            .map_err(declare_failed)?;

        if recovered > 0 {
            warn!(recovered, "♻️ Requeued unsettled messages from a previous run");
        }
        debug!(durable = spec.durable, "Queue declared");

        Ok(())
    }

    async fn consume(&self, queue: &str) -> QueueResult<DeliveryStream> {
        // Blocking commands would stall every other caller sharing the
        // manager, so each subscription gets its own connection.
        let blocking = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::ConsumeFailed {
                queue: queue.to_string(),
                message: e.to_string(),
            })?;

        let state = Subscription {
            blocking,
            settle: self.conn.clone(),
            queue: queue.to_string(),
            processing: processing_key(queue),
            block_timeout_secs: self.block_timeout.as_secs_f64(),
        };

        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            match state.next_delivery().await {
                Ok(delivery) => Some((Ok(delivery), Some(state))),
                // End the stream after surfacing the error; the consumer resubscribes
                Err(e) => Some((Err(e), None)),
            }
        });

        Ok(Box::pin(stream))
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(queue, payload)
            .await
            .map_err(|e| QueueError::PublishFailed {
                queue: queue.to_string(),
                message: e.to_string(),
            })
    }
}

struct Subscription {
    blocking: MultiplexedConnection,
    settle: ConnectionManager,
    queue: String,
    processing: String,
    block_timeout_secs: f64,
}

impl Subscription {
    async fn next_delivery(&mut self) -> QueueResult<Delivery> {
        loop {
            let moved: Option<Vec<u8>> = redis::cmd("BLMOVE")
                .arg(&self.queue)
                .arg(&self.processing)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(self.block_timeout_secs)
                .query_async(&mut self.blocking)
                .await
                .map_err(|e| QueueError::ConsumeFailed {
                    queue: self.queue.clone(),
                    message: e.to_string(),
                })?;

            if let Some(body) = moved {
                let acker = RedisAcker {
                    conn: self.settle.clone(),
                    queue: self.queue.clone(),
                    body: body.clone(),
                };
                return Ok(Delivery::new(body, Box::new(acker)));
            }
        }
    }
}

struct RedisAcker {
    conn: ConnectionManager,
    queue: String,
    body: Vec<u8>,
}

#[async_trait]
impl Acknowledger for RedisAcker {
    async fn ack(self: Box<Self>) -> QueueResult<()> {
        let RedisAcker {
            mut conn,
            queue,
            body,
        } = *self;

        let removed: i64 = conn
            .lrem(processing_key(&queue), 1, &body)
            .await
            .map_err(|e| QueueError::AckFailed(format!("{queue}: {e}")))?;

        if removed == 0 {
            debug!(queue = %queue, "Acked message was no longer in flight");
        }
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> QueueResult<()> {
        let RedisAcker {
            mut conn,
            queue,
            body,
        } = *self;

        let mut pipe = redis::pipe();
        pipe.atomic().lrem(processing_key(&queue), 1, &body).ignore();
        if requeue {
            // Back at the consuming end, redelivered next
            pipe.rpush(&queue, &body).ignore();
        } else {
            pipe.lpush(dead_letter_key(&queue), &body).ignore();
        }

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::AckFailed(format!("{queue}: {e}")))?;

        if !requeue {
            warn!(queue = %queue, "☠️ Message dead-lettered");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auxiliary_keys_derive_from_queue_name() {
        assert_eq!(processing_key("blocks"), "blocks:processing");
        assert_eq!(dead_letter_key("blocks"), "blocks:dead");
        assert_ne!(processing_key("accounts"), dead_letter_key("accounts"));
    }
}
