//! Ingestion workers for chainlens.
//!
//! Every queue-driven handler implements [`MessageHandler`] and runs inside a
//! [`QueueConsumer`], which owns subscription, settlement and resubscribe
//! logic. Ticker-driven work implements the core `Worker` port directly.
//! The [`WorkerSupervisor`] runs them all until shutdown.
//!
//! # Workers
//!
//! | Worker | Source | Effect |
//! |---|---|---|
//! | [`BlockHandler`] | `blocks` queue | enrich, batch, persist, refresh cache |
//! | [`AccountHandler`] | `accounts` queue | idempotent account creation |
//! | [`PendingTxHandler`] | `pending_transactions` queue | log arrival |
//! | [`ValidatorWorker`] | fixed ticker | reconcile validator set, publish summary |
//!
//! # Wiring
//!
//! ```ignore
//! let blocks = BlockHandler::new("blocks", repos.clone(), chain.clone(), cache, BatchConfig::default());
//!
//! let mut supervisor = WorkerSupervisor::new(Duration::from_secs(30));
//! supervisor.register(Arc::new(QueueConsumer::new(queue.clone(), Arc::new(blocks), ConsumerConfig::default())));
//! supervisor.run(shutdown_rx).await?;
//! ```

pub mod account;
pub mod block;
pub mod pending_tx;
pub mod validator;

mod consumer;
mod supervisor;
mod utils;

pub use account::AccountHandler;
pub use block::{BatchConfig, BlockHandler};
pub use consumer::{ConsumerConfig, MessageHandler, Outcome, QueueConsumer};
pub use pending_tx::PendingTxHandler;
pub use supervisor::WorkerSupervisor;
pub use validator::{ValidatorConfig, ValidatorWorker};
