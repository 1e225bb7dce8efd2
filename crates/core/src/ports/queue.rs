//! Port traits for the durable message broker.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::QueueResult;

/// Queue declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    /// Messages survive a broker restart.
    pub durable: bool,
}

impl QueueSpec {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(self: Box<Self>) -> QueueResult<()>;

    async fn nack(self: Box<Self>, requeue: bool) -> QueueResult<()>;
}

/// A message received from a queue.
///
/// Must be settled exactly once, with [`Delivery::ack`] or
/// [`Delivery::nack`].
pub struct Delivery {
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { body, acker }
    }

    pub async fn ack(self) -> QueueResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> QueueResult<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries. Ends (or yields an error) when the subscription
/// breaks; callers resubscribe.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = QueueResult<Delivery>> + Send>>;

/// Port trait for the broker.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Idempotently create or assert a queue.
    async fn declare_queue(&self, spec: &QueueSpec) -> QueueResult<()>;

    /// Subscribe to a declared queue.
    async fn consume(&self, queue: &str) -> QueueResult<DeliveryStream>;

    /// Publish a persistent message.
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()>;
}
