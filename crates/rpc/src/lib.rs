//! EVM JSON-RPC node client for the Chainlens workers.
//!
//! [`EvmNode`] implements the [`ChainClient`](chainlens_core::ports::ChainClient)
//! port over plain HTTP JSON-RPC. Validator queries default to the QBFT
//! methods exposed by Besu and can be pointed elsewhere via [`NodeConfig`].

mod client;
mod types;

pub use client::{EvmNode, NodeConfig};
