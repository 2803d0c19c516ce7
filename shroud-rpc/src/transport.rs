use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use thiserror::Error;

type Result<T> = std::result::Result<T, TransportError>;

/// Handle to a submitted transaction: an identifier with pending status.
///
/// The handle says nothing about inclusion; callers poll the receipt
/// through the transport (or [`crate::Transport::transaction_receipt`])
/// to learn the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransaction {
    /// Hash of the signed transaction as submitted
    pub tx_hash: H256,
}

/// The raw JSON-RPC primitives this layer consumes.
///
/// Everything behind this trait is an opaque Ethereum-compatible endpoint;
/// the shielding layer never inspects the wire format. The read primitives
/// (`call`, `transaction_count`, `gas_price`, `chain_id`,
/// `transaction_receipt`) are idempotent and safe to retry;
/// `send_raw_transaction` is not.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes a read-only call (`eth_call`) against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Submits a signed raw transaction, returning its hash.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256>;

    /// Fetches the receipt for a transaction, `None` while still pending.
    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>>;

    /// Returns the pending-state nonce for an address.
    async fn transaction_count(&self, address: Address) -> Result<U256>;

    /// Returns the node's current gas price.
    async fn gas_price(&self) -> Result<U256>;

    /// Returns the chain id the node is serving.
    async fn chain_id(&self) -> Result<U256>;
}

/// Transport-level failures, split by what the caller may assume happened.
///
/// `Network` means the request never reached the node, `Rpc` means the
/// node answered with an error, and `AmbiguousResponse` means the request
/// may have been delivered but the response was lost. The distinction is
/// what lets the send gateway tell a retryable submission failure from an
/// unknown outcome.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to reach the node: {0}")]
    Network(String),
    #[error("Node returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Response lost after the request was sent: {0}")]
    AmbiguousResponse(String),
    #[error("Failed to decode RPC response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Classifies a reqwest failure by whether the request can have
    /// reached the node. Connection and request-construction failures
    /// cannot have; anything later is treated as ambiguous.
    #[must_use]
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_connect() || error.is_builder() {
            Self::Network(error.to_string())
        } else {
            Self::AmbiguousResponse(error.to_string())
        }
    }
}
