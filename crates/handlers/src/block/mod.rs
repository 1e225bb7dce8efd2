//! New-block ingestion.
//!
//! Events are decoded by [`payload`], enriched and buffered by [`handler`],
//! and persisted in bounded batches by [`batcher`].

mod batcher;
mod handler;
mod payload;

pub use batcher::{BatchConfig, BatchSink, Batcher, FlushTrigger};
pub use handler::{BlockBatchItem, BlockFlusher, BlockHandler};
pub use payload::{BlockEvent, PayloadError};
