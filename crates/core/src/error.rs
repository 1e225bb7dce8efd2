//! Error types for the chainlens domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Business rule and validation errors
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Node JSON-RPC errors
//! - [`CacheError`] - Key-value cache errors
//! - [`QueueError`] - Message broker errors
//! - [`WorkerError`] - Top-level ingestion worker errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Domain Errors
// =============================================================================

/// Business logic and domain rule violations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Address failed validation.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Hash failed validation.
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    /// Account was not found in storage.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Block was not found in storage or on the node.
    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    /// Payload could not be decoded.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Node query failed.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database constraint was violated (unique, foreign key, etc.).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Stored data could not be mapped back to a domain model.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Node connectivity and JSON-RPC errors.
#[derive(Debug, Error)]
pub enum ChainError {
    /// HTTP transport failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    RpcError {
        /// JSON-RPC error code.
        code: i64,
        /// Error message reported by the node.
        message: String,
    },

    /// Response could not be decoded.
    #[error("Invalid response for {method}: {message}")]
    InvalidResponse {
        /// Method that was called.
        method: String,
        /// Error details.
        message: String,
    },

    /// Node returned `null` for the requested block.
    #[error("Block {0} not available on node")]
    BlockNotAvailable(u64),
}

// =============================================================================
// Cache Errors
// =============================================================================

/// Key-value cache errors. Never fatal for ingestion.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    #[error("Cache command error: {0}")]
    CommandError(String),

    #[error("Cache serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

// =============================================================================
// Queue Errors
// =============================================================================

/// Message broker errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Broker connection failed or was lost.
    #[error("Broker connection error: {0}")]
    ConnectionError(String),

    /// Queue could not be declared.
    #[error("Failed to declare queue {queue}: {message}")]
    DeclareFailed { queue: String, message: String },

    /// Subscription failed or broke mid-stream.
    #[error("Consume error on {queue}: {message}")]
    ConsumeFailed { queue: String, message: String },

    /// Publishing a message failed.
    #[error("Failed to publish to {queue}: {message}")]
    PublishFailed { queue: String, message: String },

    /// Ack or nack could not be delivered to the broker.
    #[error("Acknowledgement error: {0}")]
    AckFailed(String),
}

// =============================================================================
// Worker Errors
// =============================================================================

/// Top-level ingestion worker errors.
///
/// Returned by the handlers and the worker supervisor. Wraps all
/// lower-level errors and adds worker-specific variants.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Node connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Cache error.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Broker error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Worker task panicked or was aborted.
    #[error("Worker {name} failed: {message}")]
    WorkerFailed { name: String, message: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: la chaîne de conversion d'erreurs fonctionne
    // Permet d'utiliser ? à travers les couches
    #[test]
    fn test_error_conversion_chain() {
        // Storage -> Domain -> Worker
        let storage_err = StorageError::QueryError("db failed".into());
        let domain_err: DomainError = storage_err.into();
        let worker_err: WorkerError = domain_err.into();
        assert!(worker_err.to_string().contains("db failed"));

        // Chain -> Worker
        let chain_err = ChainError::RpcError {
            code: -32000,
            message: "rpc failed".into(),
        };
        let worker_err: WorkerError = chain_err.into();
        assert!(worker_err.to_string().contains("rpc failed"));
    }

    // Test critique: le nom de la queue est visible dans le message
    #[test]
    fn test_queue_error_names_queue() {
        let err: WorkerError = QueueError::ConsumeFailed {
            queue: "blocks".into(),
            message: "connection reset".into(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("blocks") && msg.contains("connection reset"));
    }
}
