//! HTTP JSON-RPC client implementing [`ChainClient`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use chainlens_core::error::{ChainError, ChainResult};
use chainlens_core::models::{Address, Bytes, SignerMetrics};
use chainlens_core::ports::{ChainBlock, ChainClient, Receipt};

use crate::types::{RpcBlock, RpcReceipt, RpcSignerMetric, decode_quantity};

/// Node client configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub url: Url,
    pub request_timeout: Duration,
    /// Method returning the current validator address set.
    pub validators_method: String,
    pub validators_params: Vec<Value>,
    /// Method returning per-signer proposal counters.
    pub signer_metrics_method: String,
}

impl NodeConfig {
    /// Config for `url` with the QBFT validator methods.
    pub fn new(url: &str) -> ChainResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| ChainError::ConnectionFailed(format!("invalid RPC url {url}: {e}")))?;
        Ok(Self {
            url,
            request_timeout: Duration::from_secs(15),
            validators_method: "qbft_getValidatorsByBlockNumber".to_string(),
            validators_params: vec![json!("latest")],
            signer_metrics_method: "qbft_getSignerMetrics".to_string(),
        })
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Unwrap a JSON-RPC response envelope into the typed result.
///
/// A `null` result decodes into `Option::None` when `T` is an `Option`.
fn decode_response<T: DeserializeOwned>(method: &str, response: RpcResponse) -> ChainResult<T> {
    if let Some(error) = response.error {
        return Err(ChainError::RpcError {
            code: error.code,
            message: error.message,
        });
    }
    serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(|e| {
        ChainError::InvalidResponse {
            method: method.to_string(),
            message: e.to_string(),
        }
    })
}

/// EVM node reached over HTTP JSON-RPC.
pub struct EvmNode {
    http: reqwest::Client,
    config: NodeConfig,
    next_id: AtomicU64,
}

impl EvmNode {
    pub fn new(config: NodeConfig) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            http,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[instrument(skip(self, params), level = "debug")]
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(self.config.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        let envelope: RpcResponse =
            response
                .json()
                .await
                .map_err(|e| ChainError::InvalidResponse {
                    method: method.to_string(),
                    message: e.to_string(),
                })?;

        decode_response(method, envelope)
    }

    /// Verify the node answers, returning its chain head.
    pub async fn block_number(&self) -> ChainResult<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        decode_u64("eth_blockNumber", &raw)
    }
}

fn block_tag(number: u64) -> String {
    format!("0x{number:x}")
}

/// Quantity that must fit a `u64`; wider values are rejected, never truncated.
fn decode_u64(method: &str, raw: &str) -> ChainResult<u64> {
    let value = decode_quantity(method, raw)?;
    u64::try_from(value).map_err(|_| ChainError::InvalidResponse {
        method: method.to_string(),
        message: format!("quantity overflows u64: {raw}"),
    })
}

#[async_trait]
impl ChainClient for EvmNode {
    async fn block_by_number(&self, number: u64) -> ChainResult<Option<ChainBlock>> {
        let block: Option<RpcBlock> = self
            .call("eth_getBlockByNumber", json!([block_tag(number), true]))
            .await?;

        block.map(RpcBlock::into_chain_block).transpose()
    }

    async fn block_receipts(&self, number: u64) -> ChainResult<Vec<Receipt>> {
        let receipts: Option<Vec<RpcReceipt>> = self
            .call("eth_getBlockReceipts", json!([block_tag(number)]))
            .await?;

        let receipts = receipts.ok_or(ChainError::BlockNotAvailable(number))?;
        debug!(number, count = receipts.len(), "Fetched block receipts");
        Ok(receipts.into_iter().map(Receipt::from).collect())
    }

    async fn pending_nonce(&self, address: &Address) -> ChainResult<u64> {
        let raw: String = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        decode_u64("eth_getTransactionCount", &raw)
    }

    async fn balance(&self, address: &Address) -> ChainResult<u128> {
        let raw: String = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        decode_quantity("eth_getBalance", &raw)
    }

    async fn code_at(&self, address: &Address) -> ChainResult<Bytes> {
        self.call("eth_getCode", json!([address, "latest"])).await
    }

    async fn validator_addresses(&self) -> ChainResult<Vec<Address>> {
        self.call(
            &self.config.validators_method,
            Value::Array(self.config.validators_params.clone()),
        )
        .await
    }

    async fn signer_metrics(&self) -> ChainResult<Vec<SignerMetrics>> {
        let metrics: Vec<RpcSignerMetric> = self
            .call(&self.config.signer_metrics_method, json!([]))
            .await?;
        Ok(metrics.into_iter().map(SignerMetrics::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(value: Value) -> RpcResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_rpc_error_is_surfaced() {
        let response = envelope(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "Method not found" }
        }));
        let err = decode_response::<Value>("qbft_getSignerMetrics", response).unwrap_err();
        assert!(matches!(err, ChainError::RpcError { code: -32601, .. }));
    }

    #[test]
    fn test_null_result_decodes_to_none() {
        let response = envelope(json!({ "jsonrpc": "2.0", "id": 1, "result": null }));
        let block: Option<RpcBlock> = decode_response("eth_getBlockByNumber", response).unwrap();
        assert!(block.is_none());
    }

    #[test]
    fn test_validator_addresses_decode() {
        let response = envelope(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [format!("0x{}", "aa".repeat(20)), format!("0x{}", "bb".repeat(20))]
        }));
        let addresses: Vec<Address> =
            decode_response("qbft_getValidatorsByBlockNumber", response).unwrap();
        assert_eq!(addresses, vec![Address([0xaa; 20]), Address([0xbb; 20])]);
    }

    // Test critique: une hauteur hors u64 est rejetée, jamais tronquée en un petit numéro
    #[test]
    fn test_oversized_quantity_is_rejected() {
        assert_eq!(decode_u64("eth_blockNumber", "0x64").unwrap(), 100);
        assert_eq!(
            decode_u64("eth_blockNumber", "0xffffffffffffffff").unwrap(),
            u64::MAX
        );

        let err = decode_u64("eth_blockNumber", "0x10000000000000001").unwrap_err();
        assert!(matches!(
            err,
            ChainError::InvalidResponse { ref method, .. } if method == "eth_blockNumber"
        ));
    }

    #[test]
    fn test_wrong_shape_is_invalid_response() {
        let response = envelope(json!({ "jsonrpc": "2.0", "id": 1, "result": 42 }));
        let err = decode_response::<Vec<Address>>("qbft_getValidatorsByBlockNumber", response)
            .unwrap_err();
        assert!(err.to_string().contains("qbft_getValidatorsByBlockNumber"));
    }

    #[test]
    fn test_config_defaults_and_url_validation() {
        let config = NodeConfig::new("http://localhost:8545").unwrap();
        assert_eq!(config.validators_method, "qbft_getValidatorsByBlockNumber");
        assert_eq!(config.validators_params, vec![json!("latest")]);
        assert_eq!(block_tag(100), "0x64");

        assert!(NodeConfig::new("not a url").is_err());
    }
}
