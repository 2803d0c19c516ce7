use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::trace;
use url::Url;

use crate::transport::{Transport, TransportError};

type Result<T> = std::result::Result<T, TransportError>;

/// JSON-RPC error code for a method the node does not expose
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: serde_json::Value,
    pub id: u64,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(method: &'a str, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 response envelope
#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// HTTP JSON-RPC implementation of the [`Transport`] seam.
///
/// One instance per endpoint; connection pooling and reuse are delegated
/// to the inner `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    request_id: AtomicU64,
}

impl HttpTransport {
    /// Builds a transport for the given endpoint.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(endpoint: Url, request_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::from_reqwest(&e))?;
        Ok(Self {
            client,
            endpoint,
            request_id: AtomicU64::new(1),
        })
    }

    /// Issues one JSON-RPC request and decodes the `result` field.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        trace!(
            target = "shroud-rpc",
            event = "json_rpc_request",
            method = method,
            id = id,
            "Issuing JSON-RPC request"
        );
        let request = JsonRpcRequest::new(method, params, id);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        let response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        if let Some(error) = response.error {
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        // A null (or absent) result is legitimate for methods like
        // eth_getTransactionReceipt, where it decodes to `None`.
        let result = response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        self.request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        self.request("eth_sendRawTransaction", json!([raw])).await
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        self.request("eth_getTransactionReceipt", json!([tx_hash]))
            .await
    }

    async fn transaction_count(&self, address: Address) -> Result<U256> {
        self.request("eth_getTransactionCount", json!([address, "pending"]))
            .await
    }

    async fn gas_price(&self) -> Result<U256> {
        self.request("eth_gasPrice", json!([])).await
    }

    async fn chain_id(&self) -> Result<U256> {
        self.request("eth_chainId", json!([])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = JsonRpcRequest::new("eth_call", json!([{ "to": "0x00" }, "latest"]), 7);
        let serialized = serde_json::to_value(&request).unwrap();
        assert_eq!(
            serialized,
            json!({
                "jsonrpc": "2.0",
                "method": "eth_call",
                "params": [{ "to": "0x00" }, "latest"],
                "id": 7,
            })
        );
    }

    #[test]
    fn test_response_error_is_surfaced() {
        let raw = r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"method not found"},"id":1}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        let error = response.error.expect("error object should parse");
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.message, "method not found");
        assert!(response.result.is_none());
    }

    #[test]
    fn test_result_decodes_into_ethereum_types() {
        let raw = r#"{"jsonrpc":"2.0","result":"0x609ff1bd","id":1}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        let bytes: Bytes = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(bytes.to_vec(), vec![0x60, 0x9f, 0xf1, 0xbd]);

        let raw = r#"{"jsonrpc":"2.0","result":"0x501","id":2}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        let chain_id: U256 = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(chain_id, U256::from(1281));
    }

    #[test]
    fn test_null_receipt_decodes_to_none() {
        let raw = r#"{"jsonrpc":"2.0","result":null,"id":3}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        let result = response.result.unwrap_or(serde_json::Value::Null);
        let receipt: Option<TransactionReceipt> = serde_json::from_value(result).unwrap();
        assert!(receipt.is_none(), "Null receipt means still pending");
    }
}
