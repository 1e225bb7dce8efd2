//! Pending transaction notifications.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use chainlens_core::metrics::record_pending_transaction;

use crate::consumer::{MessageHandler, Outcome};

#[derive(Debug, Deserialize)]
struct PendingTxEvent {
    #[serde(default)]
    hash: String,
}

/// Logs pending transactions as they enter the mempool. Stateless.
pub struct PendingTxHandler {
    queue: String,
}

impl PendingTxHandler {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for PendingTxHandler {
    fn name(&self) -> &'static str {
        "pending_transactions"
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, body: &[u8]) -> Outcome {
        let hash = serde_json::from_slice::<PendingTxEvent>(body)
            .map(|event| event.hash.trim().to_string())
            .unwrap_or_default();

        if hash.is_empty() {
            debug!("Pending transaction event without hash, discarding");
            return Outcome::Ack;
        }

        info!(%hash, "⏳ Pending transaction");
        record_pending_transaction();
        Outcome::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_event_is_acked() {
        let handler = PendingTxHandler::new("pending_transactions");
        assert_eq!(handler.handle(b"{\"hash\": \"0xabc\"}").await, Outcome::Ack);
        assert_eq!(handler.handle(b"{\"hash\": \"\"}").await, Outcome::Ack);
        assert_eq!(handler.handle(b"{}").await, Outcome::Ack);
        assert_eq!(handler.handle(b"garbage").await, Outcome::Ack);
    }
}
