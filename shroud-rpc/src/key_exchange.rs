use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{instrument, trace};
use url::Url;
use x25519_dalek::PublicKey;

use crate::http::{JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND};

type Result<T> = std::result::Result<T, KeyExchangeError>;

/// Default RPC method for retrieving the node's encryption key.
///
/// Confidential-EVM chains each name this method their own way, so it is
/// part of the configuration surface rather than a hard constant.
pub const DEFAULT_KEY_EXCHANGE_METHOD: &str = "eth_getNodePublicKey";

/// The node's current X25519 public encryption key, bound to the endpoint
/// it was fetched from.
///
/// This layer assumes no rotation cadence; a key is as fresh as the fetch
/// that produced it, and an authentication failure on decryption is the
/// signal that it may have rotated mid-flight.
#[derive(Debug, Clone)]
pub struct NodePublicKey {
    key: PublicKey,
    endpoint: String,
}

impl NodePublicKey {
    /// Binds a public key to the endpoint it was obtained from.
    #[must_use]
    pub fn new(key: PublicKey, endpoint: String) -> Self {
        Self { key, endpoint }
    }

    /// The X25519 public key itself
    #[must_use]
    pub const fn key(&self) -> &PublicKey {
        &self.key
    }

    /// The endpoint this key was fetched from
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Source of node encryption keys: the seam the gateways consume.
///
/// Implemented by [`KeyExchangeClient`] over the wire, and by in-memory
/// fakes in gateway tests.
#[async_trait]
pub trait NodeKeyProvider: Send + Sync {
    /// Fetches the node's current public encryption key.
    async fn fetch_node_key(&self) -> Result<NodePublicKey>;
}

struct CachedKey {
    key: NodePublicKey,
    fetched_at: Instant,
}

impl CachedKey {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Fetches the node's public encryption key via a configurable JSON-RPC
/// method, with an optional read-through cache.
///
/// The fetch is a read-only idempotent exchange with no retries of its
/// own; callers decide retry policy. Caching is disabled by default
/// (zero TTL) because a cached key can outlive the node's rotation.
pub struct KeyExchangeClient {
    client: reqwest::Client,
    endpoint: Url,
    method: String,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedKey>>,
}

impl KeyExchangeClient {
    /// Builds a key exchange client for the given endpoint.
    ///
    /// A `cache_ttl` of zero (the default stance) disables the cache and
    /// every shielded operation fetches a fresh key.
    ///
    /// # Errors
    /// Returns [`KeyExchangeError::NetworkUnavailable`] if the underlying
    /// HTTP client cannot be built.
    pub fn new(
        endpoint: Url,
        method: String,
        request_timeout: Option<Duration>,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| KeyExchangeError::NetworkUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            method,
            cache_ttl,
            cache: RwLock::new(None),
        })
    }

    async fn fetch_over_the_wire(&self) -> Result<NodePublicKey> {
        let request = JsonRpcRequest::new(&self.method, json!([]), 1);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| KeyExchangeError::NetworkUnavailable(e.to_string()))?;
        let response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| KeyExchangeError::NetworkUnavailable(e.to_string()))?;
        if let Some(error) = response.error {
            if error.code == METHOD_NOT_FOUND {
                return Err(KeyExchangeError::UnsupportedNode);
            }
            // Any other node-side error on this idempotent fetch is
            // treated as the endpoint being unavailable for key exchange.
            return Err(KeyExchangeError::NetworkUnavailable(format!(
                "JSON-RPC error {}: {}",
                error.code, error.message
            )));
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        let key = parse_node_key(&result)?;
        Ok(NodePublicKey {
            key,
            endpoint: self.endpoint.to_string(),
        })
    }
}

#[async_trait]
impl NodeKeyProvider for KeyExchangeClient {
    #[instrument(level = "trace", skip_all, fields(endpoint = %self.endpoint))]
    async fn fetch_node_key(&self) -> Result<NodePublicKey> {
        if !self.cache_ttl.is_zero() {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh(self.cache_ttl) {
                    trace!(
                        target = "shroud-rpc",
                        event = "node_key_cache_hit",
                        "Serving node key from cache"
                    );
                    return Ok(cached.key.clone());
                }
            }
        }
        let key = self.fetch_over_the_wire().await?;
        if !self.cache_ttl.is_zero() {
            let mut cache = self.cache.write().await;
            *cache = Some(CachedKey {
                key: key.clone(),
                fetched_at: Instant::now(),
            });
        }
        Ok(key)
    }
}

/// Parses the key-exchange RPC result into an X25519 public key.
///
/// Accepts a hex string with or without the `0x` prefix; anything that is
/// not exactly 32 bytes of hex is malformed.
pub fn parse_node_key(value: &serde_json::Value) -> Result<PublicKey> {
    let text = value
        .as_str()
        .ok_or_else(|| KeyExchangeError::MalformedKey(format!("expected a hex string, got: {value}")))?;
    let text = text.strip_prefix("0x").unwrap_or(text);
    let bytes = hex::decode(text)
        .map_err(|e| KeyExchangeError::MalformedKey(format!("invalid hex: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| {
            KeyExchangeError::MalformedKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
    Ok(PublicKey::from(bytes))
}

#[derive(Debug, Error)]
pub enum KeyExchangeError {
    #[error("Failed to reach the node for key exchange: {0}")]
    NetworkUnavailable(String),
    #[error("Node does not expose the key-exchange method")]
    UnsupportedNode,
    #[error("Node returned a malformed public key: {0}")]
    MalformedKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_key_accepts_prefixed_and_bare_hex() {
        let hex_key = "11".repeat(32);
        for text in [format!("0x{hex_key}"), hex_key] {
            let key = parse_node_key(&json!(text)).expect("32 hex bytes should parse");
            assert_eq!(key.as_bytes(), &[0x11u8; 32]);
        }
    }

    #[test]
    fn test_parse_node_key_rejects_wrong_length() {
        let result = parse_node_key(&json!("0x1122"));
        assert!(matches!(result, Err(KeyExchangeError::MalformedKey(_))));
    }

    #[test]
    fn test_parse_node_key_rejects_non_hex() {
        let result = parse_node_key(&json!(format!("0x{}", "zz".repeat(32))));
        assert!(matches!(result, Err(KeyExchangeError::MalformedKey(_))));
    }

    #[test]
    fn test_parse_node_key_rejects_non_string_result() {
        for value in [json!(42), json!(null), json!(["0x11"])] {
            let result = parse_node_key(&value);
            assert!(matches!(result, Err(KeyExchangeError::MalformedKey(_))));
        }
    }

    #[test]
    fn test_cached_key_freshness_window() {
        let cached = CachedKey {
            key: NodePublicKey {
                key: PublicKey::from([0x11u8; 32]),
                endpoint: "http://localhost:8545/".to_string(),
            },
            fetched_at: Instant::now(),
        };
        assert!(cached.is_fresh(Duration::from_secs(60)));
        assert!(!cached.is_fresh(Duration::ZERO));
    }
}
