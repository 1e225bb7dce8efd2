//! Core domain layer for the chainlens explorer backend.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! business logic services for the ingestion workers. It follows
//! hexagonal architecture principles - this is the innermost layer with
//! no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    chainlens (binary)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │               chainlens-handlers (workers)                  │
//! ├───────────────────┬────────────────────┬────────────────────┤
//! │ chainlens-storage │  chainlens-redis   │   chainlens-rpc    │
//! │   (PostgreSQL)    │  (cache + queue)   │    (JSON-RPC)      │
//! ├───────────────────┴────────────────────┴────────────────────┤
//! │                   chainlens-core  ← YOU ARE HERE            │
//! │            (models, ports, services, cache store)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Block, Transaction, Account, ...)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Account and validator business rules
//! - [`cache`] - Tiered cache store over a key-value backend
//! - [`error`] - Error types per layer
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Ports
//!
//! - [`ports::MessageQueue`] - Durable queue consume/publish
//! - [`ports::ChainClient`] - Node queries used for enrichment
//! - [`ports::Repositories`] - Persist and query indexed data
//! - [`ports::KeyValueCache`] - Raw cache backend
//! - [`ports::Worker`] - Uniform long-running worker interface
//!
//! # Ingestion Lifecycle
//!
//! 1. A worker consumes a delivery from its queue
//! 2. The payload is enriched through the node
//! 3. A domain service applies business rules
//! 4. Repositories persist the result (single record or batch)
//! 5. Hot cache keys are refreshed
//! 6. The delivery is acknowledged once persistence is durable

pub mod cache;
pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
