//! Storage layer for the Chainlens workers.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `chainlens-core`. It handles all database interactions including
//! connection pooling, migrations, and upserts.
//!
//! # Architecture
//!
//! The storage layer follows the repository pattern:
//!
//! - [`postgres::Database`] - Connection pool management
//! - [`postgres::PgRepositories`] - Composite repository for all entity types
//! - Individual repositories for blocks, transactions, accounts, validators
//!   and smart contracts
//!
//! # Usage
//!
//! ```ignore
//! use chainlens_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! let config = DatabaseConfig::for_workers(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = Arc::new(PgRepositories::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepositories};
