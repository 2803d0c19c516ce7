use ethers::{
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, TransactionReceipt, TransactionRequest,
        H256, U256,
    },
    utils::keccak256,
};
use shroud_envelope::{envelope::EnvelopeError, open, seal, EphemeralKeyPair};
use shroud_rpc::{
    HttpTransport, KeyExchangeClient, KeyExchangeError, NodeKeyProvider, PendingTransaction,
    Transport, TransportError,
};
use thiserror::Error;
use tracing::{instrument, trace, warn};
use url::Url;

use crate::config::ShroudConfig;

type Result<T> = std::result::Result<T, ShroudClientError>;

/// The shielded call/transaction client.
///
/// Wraps a [`Transport`] and a [`NodeKeyProvider`] and exposes exactly two
/// operations: [`shielded_call`](Self::shielded_call) for reads and
/// [`shielded_send`](Self::shielded_send) for writes, plus receipt
/// confirmation. Every operation is stateless: a fresh ephemeral key pair
/// and shared secret per invocation, so concurrent operations need no
/// coordination.
pub struct ShroudClient<T, K> {
    /// The raw JSON-RPC primitives; pooling and reuse live behind this seam
    transport: T,

    /// Source of the node's current encryption key
    node_keys: K,

    /// Client configuration (payload bound, gas limit, polling)
    config: ShroudConfig,
}

impl<T, K> ShroudClient<T, K>
where
    T: Transport,
    K: NodeKeyProvider,
{
    /// Constructor
    pub fn new(transport: T, node_keys: K, config: ShroudConfig) -> Self {
        Self {
            transport,
            node_keys,
            config,
        }
    }

    /// Performs a shielded read call.
    ///
    /// Fetches the node's encryption key, encrypts `data` under a fresh
    /// ephemeral pair, invokes `eth_call` with the envelope as the call
    /// data, and decrypts the node's response with the same shared secret
    /// that encrypted the request. The secret is never re-derived
    /// mid-flight, so a node key rotation between fetch and response
    /// surfaces as [`ShroudClientError::AuthenticationFailure`] rather
    /// than silent corruption.
    ///
    /// This operation changes no on-chain state; any failure leaves no
    /// partial result and the whole sequence is safe to retry.
    ///
    /// # Errors
    /// * [`ShroudClientError::ShieldingUnavailable`] if the node does not
    ///   support shielding; no transport call is made and plaintext is
    ///   never sent without the caller explicitly opting in
    /// * [`ShroudClientError::NetworkUnavailable`] on transport failure
    /// * [`ShroudClientError::EncodingError`] if `data` exceeds the
    ///   configured maximum payload size
    /// * [`ShroudClientError::AuthenticationFailure`] if the response does
    ///   not verify under the request's shared secret
    #[instrument(level = "trace", skip_all, fields(to = %to, payload_len = data.len()))]
    pub async fn shielded_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let node_key = self.node_keys.fetch_node_key().await?;
        let ephemeral = EphemeralKeyPair::generate();
        let shared_secret = ephemeral.diffie_hellman(node_key.key());
        let envelope = seal(
            &shared_secret,
            ephemeral.public_key(),
            data,
            self.config.max_payload_size(),
        )?;
        let response = self
            .transport
            .call(to, envelope.to_bytes().into())
            .await
            .map_err(|e| ShroudClientError::NetworkUnavailable(e.to_string()))?;
        let plaintext = open(&shared_secret, &response)?;
        trace!(
            target = "shroud-client",
            event = "shielded_call_complete",
            response_len = plaintext.len(),
            "Shielded call complete"
        );
        Ok(plaintext)
    }

    /// Submits a shielded transaction.
    ///
    /// Same shielding steps as [`shielded_call`](Self::shielded_call), but
    /// the envelope becomes the data field of a signed transaction. There
    /// is no decryption step: the chain returns no call data for writes,
    /// only a handle to poll.
    ///
    /// Failures before the raw transaction is submitted are safe to retry
    /// from scratch. Once submission may have reached the node, a failure
    /// surfaces as [`ShroudClientError::UnknownOutcome`] carrying the
    /// transaction hash; blindly retrying at that point risks a duplicate
    /// on-chain effect, so the caller must resolve the handle first.
    ///
    /// # Errors
    /// * Pre-submission: [`ShroudClientError::ShieldingUnavailable`],
    ///   [`ShroudClientError::NetworkUnavailable`],
    ///   [`ShroudClientError::EncodingError`],
    ///   [`ShroudClientError::SubmissionFailure`] (node rejected the
    ///   transaction before inclusion) — all retryable
    /// * Post-submission: [`ShroudClientError::UnknownOutcome`]
    #[instrument(level = "trace", skip_all, fields(to = %to, payload_len = data.len()))]
    pub async fn shielded_send(
        &self,
        signer: &LocalWallet,
        to: Address,
        data: &[u8],
        value: U256,
    ) -> Result<PendingTransaction> {
        let node_key = self.node_keys.fetch_node_key().await?;
        let ephemeral = EphemeralKeyPair::generate();
        let shared_secret = ephemeral.diffie_hellman(node_key.key());
        let envelope = seal(
            &shared_secret,
            ephemeral.public_key(),
            data,
            self.config.max_payload_size(),
        )?;

        let from = signer.address();
        let chain_id = self.transport.chain_id().await.map_err(retryable)?;
        let nonce = self
            .transport
            .transaction_count(from)
            .await
            .map_err(retryable)?;
        let gas_price = self.transport.gas_price().await.map_err(retryable)?;

        let tx = TransactionRequest::new()
            .from(from)
            .to(to)
            .data(envelope.to_bytes())
            .value(value)
            .nonce(nonce)
            .gas_price(gas_price)
            .gas(self.config.gas_limit())
            .chain_id(chain_id.as_u64());
        let typed: TypedTransaction = tx.into();
        let signature = signer.sign_transaction(&typed).await.map_err(|e| {
            ShroudClientError::SubmissionFailure(format!("failed to sign transaction: {e}"))
        })?;
        let raw = typed.rlp_signed(&signature);
        let tx_hash = H256::from(keccak256(&raw));

        match self.transport.send_raw_transaction(raw).await {
            Ok(tx_hash) => {
                trace!(
                    target = "shroud-client",
                    event = "shielded_send_submitted",
                    tx_hash = %tx_hash,
                    "Shielded transaction submitted"
                );
                Ok(PendingTransaction { tx_hash })
            }
            // The request never left: retrying cannot double-submit.
            Err(TransportError::Network(e)) => Err(ShroudClientError::NetworkUnavailable(e)),
            // The node saw and rejected the transaction pre-inclusion.
            Err(TransportError::Rpc { code, message }) => Err(
                ShroudClientError::SubmissionFailure(format!("{code}: {message}")),
            ),
            // The request may have been delivered; the transaction may
            // still land on-chain.
            Err(TransportError::AmbiguousResponse(e)) | Err(TransportError::Decode(e)) => {
                warn!(
                    target = "shroud-client",
                    event = "shielded_send_unknown_outcome",
                    tx_hash = %tx_hash,
                    error = %e,
                    "Submission outcome unknown; the handle must be checked"
                );
                Err(ShroudClientError::UnknownOutcome {
                    tx_hash: Some(tx_hash),
                })
            }
        }
    }

    /// Polls for the receipt of a submitted transaction.
    ///
    /// # Errors
    /// Returns [`ShroudClientError::UnknownOutcome`] if polling fails or
    /// the receipt does not appear within the configured attempts; the
    /// transaction may still be included later.
    #[instrument(level = "trace", skip_all, fields(tx_hash = %pending.tx_hash))]
    pub async fn confirm(&self, pending: &PendingTransaction) -> Result<TransactionReceipt> {
        for attempt in 0..self.config.receipt_poll_attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.config.receipt_poll_interval()).await;
            }
            match self.transport.transaction_receipt(pending.tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        target = "shroud-client",
                        event = "receipt_poll_failed",
                        tx_hash = %pending.tx_hash,
                        error = %error,
                        "Receipt polling failed after submission"
                    );
                    return Err(ShroudClientError::UnknownOutcome {
                        tx_hash: Some(pending.tx_hash),
                    });
                }
            }
        }
        Err(ShroudClientError::UnknownOutcome {
            tx_hash: Some(pending.tx_hash),
        })
    }
}

/// Failures on idempotent read primitives are always retryable,
/// regardless of how the transport classified them.
fn retryable(error: TransportError) -> ShroudClientError {
    ShroudClientError::NetworkUnavailable(error.to_string())
}

impl ShroudClient<HttpTransport, KeyExchangeClient> {
    /// Builds a client speaking HTTP JSON-RPC to the configured endpoint.
    ///
    /// # Errors
    /// Returns an error if the endpoint URL is invalid or the HTTP stack
    /// cannot be initialized.
    pub fn from_config(config: ShroudConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint())
            .map_err(|e| ShroudClientError::InvalidEndpoint(e.to_string()))?;
        let transport = HttpTransport::new(endpoint.clone(), config.request_timeout())
            .map_err(|e| ShroudClientError::NetworkUnavailable(e.to_string()))?;
        let node_keys = KeyExchangeClient::new(
            endpoint,
            config.key_exchange_method(),
            config.request_timeout(),
            config.key_cache_ttl(),
        )?;
        Ok(Self::new(transport, node_keys, config))
    }
}

#[derive(Debug, Error)]
pub enum ShroudClientError {
    #[error("Failed to reach the node: {0}")]
    NetworkUnavailable(String),
    #[error("Node does not support shielded calls")]
    ShieldingUnavailable,
    #[error("Node returned a malformed encryption key: {0}")]
    MalformedKey(String),
    #[error("Payload cannot be shielded: {0}")]
    EncodingError(String),
    #[error("Failed to authenticate the encrypted response; the node key may have rotated")]
    AuthenticationFailure,
    #[error("Transaction rejected before inclusion: {0}")]
    SubmissionFailure(String),
    #[error("Outcome unknown after submission (tx hash: {tx_hash:?}); the transaction may still land on-chain")]
    UnknownOutcome { tx_hash: Option<H256> },
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
}

impl ShroudClientError {
    /// Whether the whole operation can be retried from scratch without
    /// risking a duplicate on-chain effect.
    #[must_use]
    pub const fn is_safe_to_retry(&self) -> bool {
        !matches!(self, Self::UnknownOutcome { .. })
    }
}

impl From<KeyExchangeError> for ShroudClientError {
    fn from(error: KeyExchangeError) -> Self {
        match error {
            KeyExchangeError::NetworkUnavailable(e) => Self::NetworkUnavailable(e),
            KeyExchangeError::UnsupportedNode => Self::ShieldingUnavailable,
            KeyExchangeError::MalformedKey(e) => Self::MalformedKey(e),
        }
    }
}

impl From<EnvelopeError> for ShroudClientError {
    fn from(error: EnvelopeError) -> Self {
        if error.is_authentication_failure() {
            Self::AuthenticationFailure
        } else {
            Self::EncodingError(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use ethers::types::Bytes;
    use shroud_envelope::{
        envelope::{EncryptedEnvelope, DEFAULT_MAX_PAYLOAD_SIZE},
        open, seal,
    };
    use shroud_rpc::{KeyExchangeError, NodePublicKey};
    use x25519_dalek::{PublicKey, StaticSecret};

    use super::*;

    /// `createBid(address[],string,uint256)`-style calldata stand-in
    const CALL_DATA: [u8; 8] = [0x12, 0x34, 0x56, 0x78, 0x00, 0x01, 0x02, 0x03];
    const SIGNER_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    struct FixedKeyProvider {
        node_public: PublicKey,
    }

    #[async_trait]
    impl NodeKeyProvider for FixedKeyProvider {
        async fn fetch_node_key(
            &self,
        ) -> std::result::Result<NodePublicKey, KeyExchangeError> {
            Ok(NodePublicKey::new(
                self.node_public,
                "http://localhost:8545/".to_string(),
            ))
        }
    }

    struct UnsupportedNodeProvider;

    #[async_trait]
    impl NodeKeyProvider for UnsupportedNodeProvider {
        async fn fetch_node_key(
            &self,
        ) -> std::result::Result<NodePublicKey, KeyExchangeError> {
            Err(KeyExchangeError::UnsupportedNode)
        }
    }

    #[derive(Clone, Copy)]
    enum SendBehavior {
        Accept,
        Reject,
        Ambiguous,
    }

    /// In-memory node: decrypts incoming envelopes with its own secret and
    /// answers with an envelope sealed under the same shared secret.
    struct MockNodeTransport {
        node_secret: StaticSecret,
        response_plaintext: Vec<u8>,
        send_behavior: SendBehavior,
        receipt_fails: bool,
        calls: AtomicUsize,
        seen_envelopes: Mutex<Vec<Vec<u8>>>,
        seen_plaintexts: Mutex<Vec<Vec<u8>>>,
    }

    impl MockNodeTransport {
        fn new(node_secret: StaticSecret, response_plaintext: Vec<u8>) -> Self {
            Self {
                node_secret,
                response_plaintext,
                send_behavior: SendBehavior::Accept,
                receipt_fails: false,
                calls: AtomicUsize::new(0),
                seen_envelopes: Mutex::new(Vec::new()),
                seen_plaintexts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for MockNodeTransport {
        async fn call(
            &self,
            _to: Address,
            data: Bytes,
        ) -> std::result::Result<Bytes, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_envelopes.lock().unwrap().push(data.to_vec());

            let envelope = EncryptedEnvelope::from_bytes(&data)
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            let shared_secret = self
                .node_secret
                .diffie_hellman(&PublicKey::from(envelope.client_public_key));
            let plaintext = open(&shared_secret, &data)
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            self.seen_plaintexts.lock().unwrap().push(plaintext);

            let response = seal(
                &shared_secret,
                PublicKey::from(envelope.client_public_key),
                &self.response_plaintext,
                DEFAULT_MAX_PAYLOAD_SIZE,
            )
            .map_err(|e| TransportError::Decode(e.to_string()))?;
            Ok(response.to_bytes().into())
        }

        async fn send_raw_transaction(
            &self,
            raw: Bytes,
        ) -> std::result::Result<H256, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.send_behavior {
                SendBehavior::Accept => Ok(H256::from(keccak256(&raw))),
                SendBehavior::Reject => Err(TransportError::Rpc {
                    code: -32000,
                    message: "nonce too low".to_string(),
                }),
                SendBehavior::Ambiguous => Err(TransportError::AmbiguousResponse(
                    "connection reset while reading response".to_string(),
                )),
            }
        }

        async fn transaction_receipt(
            &self,
            _tx_hash: H256,
        ) -> std::result::Result<Option<TransactionReceipt>, TransportError> {
            if self.receipt_fails {
                return Err(TransportError::AmbiguousResponse(
                    "connection reset".to_string(),
                ));
            }
            Ok(Some(TransactionReceipt::default()))
        }

        async fn transaction_count(
            &self,
            _address: Address,
        ) -> std::result::Result<U256, TransportError> {
            Ok(U256::zero())
        }

        async fn gas_price(&self) -> std::result::Result<U256, TransportError> {
            Ok(U256::from(1_000_000_000u64))
        }

        async fn chain_id(&self) -> std::result::Result<U256, TransportError> {
            Ok(U256::from(1291))
        }
    }

    fn node_secret() -> StaticSecret {
        StaticSecret::from([0x11u8; 32])
    }

    fn test_config() -> ShroudConfig {
        toml::from_str(
            "endpoint = \"http://localhost:8545\"\nreceipt_poll_interval_ms = 1\nreceipt_poll_attempts = 2\n",
        )
        .unwrap()
    }

    fn client_with(
        transport: MockNodeTransport,
    ) -> ShroudClient<MockNodeTransport, FixedKeyProvider> {
        let node_public = PublicKey::from(&node_secret());
        ShroudClient::new(
            transport,
            FixedKeyProvider { node_public },
            test_config(),
        )
    }

    #[tokio::test]
    async fn test_shielded_call_roundtrips_through_the_node() {
        let response = b"vote accepted".to_vec();
        let client = client_with(MockNodeTransport::new(node_secret(), response.clone()));

        let result = client
            .shielded_call(Address::zero(), &CALL_DATA)
            .await
            .expect("Shielded call should succeed");
        assert_eq!(result, response, "Caller receives the decrypted response");

        let seen = client.transport.seen_plaintexts.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[CALL_DATA.to_vec()],
            "The node sees exactly the original calldata, nothing in the clear on the wire"
        );
    }

    #[tokio::test]
    async fn test_unsupported_node_short_circuits_without_transport_call() {
        let transport = MockNodeTransport::new(node_secret(), Vec::new());
        let client = ShroudClient::new(transport, UnsupportedNodeProvider, test_config());

        let result = client.shielded_call(Address::zero(), &CALL_DATA).await;
        assert!(matches!(
            result,
            Err(ShroudClientError::ShieldingUnavailable)
        ));
        assert_eq!(
            client.transport.calls.load(Ordering::SeqCst),
            0,
            "No plaintext may be sent when shielding is unavailable"
        );
    }

    #[tokio::test]
    async fn test_sequential_calls_use_fresh_envelopes() {
        let client = client_with(MockNodeTransport::new(node_secret(), b"ok".to_vec()));

        client.shielded_call(Address::zero(), &CALL_DATA).await.unwrap();
        client.shielded_call(Address::zero(), &CALL_DATA).await.unwrap();

        let envelopes = client.transport.seen_envelopes.lock().unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_ne!(
            envelopes[0], envelopes[1],
            "Identical calls must produce unlinkable envelopes"
        );
    }

    #[tokio::test]
    async fn test_oversized_payload_fails_before_any_network_traffic() {
        let client = client_with(MockNodeTransport::new(node_secret(), Vec::new()));
        let config: ShroudConfig = toml::from_str(
            "endpoint = \"http://localhost:8545\"\nmax_payload_size = 16\n",
        )
        .unwrap();
        let client = ShroudClient::new(client.transport, client.node_keys, config);

        let result = client.shielded_call(Address::zero(), &[0u8; 17]).await;
        assert!(matches!(result, Err(ShroudClientError::EncodingError(_))));
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shielded_send_returns_a_pending_handle() {
        let client = client_with(MockNodeTransport::new(node_secret(), Vec::new()));
        let signer: LocalWallet = SIGNER_KEY.parse().unwrap();

        let pending = client
            .shielded_send(&signer, Address::zero(), &CALL_DATA, U256::zero())
            .await
            .expect("Submission should succeed");
        assert_ne!(pending.tx_hash, H256::zero());
    }

    #[tokio::test]
    async fn test_rejected_submission_is_retryable() {
        let mut transport = MockNodeTransport::new(node_secret(), Vec::new());
        transport.send_behavior = SendBehavior::Reject;
        let client = client_with(transport);
        let signer: LocalWallet = SIGNER_KEY.parse().unwrap();

        let result = client
            .shielded_send(&signer, Address::zero(), &CALL_DATA, U256::zero())
            .await;
        match result {
            Err(error @ ShroudClientError::SubmissionFailure(_)) => {
                assert!(error.is_safe_to_retry());
            }
            other => panic!("Expected SubmissionFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ambiguous_submission_failure_is_unknown_outcome() {
        let mut transport = MockNodeTransport::new(node_secret(), Vec::new());
        transport.send_behavior = SendBehavior::Ambiguous;
        let client = client_with(transport);
        let signer: LocalWallet = SIGNER_KEY.parse().unwrap();

        let result = client
            .shielded_send(&signer, Address::zero(), &CALL_DATA, U256::zero())
            .await;
        match result {
            Err(error @ ShroudClientError::UnknownOutcome { tx_hash: Some(_) }) => {
                assert!(
                    !error.is_safe_to_retry(),
                    "An unknown outcome must never be conflated with a rejected submission"
                );
            }
            other => panic!("Expected UnknownOutcome with a hash, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_receipt_poll_failure_after_submission_is_unknown_outcome() {
        let mut transport = MockNodeTransport::new(node_secret(), Vec::new());
        transport.receipt_fails = true;
        let client = client_with(transport);

        let pending = PendingTransaction {
            tx_hash: H256::from([0xabu8; 32]),
        };
        let result = client.confirm(&pending).await;
        assert!(matches!(
            result,
            Err(ShroudClientError::UnknownOutcome {
                tx_hash: Some(hash)
            }) if hash == pending.tx_hash
        ));
    }

    #[tokio::test]
    async fn test_confirm_returns_the_receipt() {
        let client = client_with(MockNodeTransport::new(node_secret(), Vec::new()));
        let pending = PendingTransaction {
            tx_hash: H256::from([0xcdu8; 32]),
        };
        client
            .confirm(&pending)
            .await
            .expect("Receipt should be returned");
    }

    #[test]
    fn test_key_exchange_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            ShroudClientError::from(KeyExchangeError::UnsupportedNode),
            ShroudClientError::ShieldingUnavailable
        ));
        assert!(matches!(
            ShroudClientError::from(KeyExchangeError::MalformedKey("short".to_string())),
            ShroudClientError::MalformedKey(_)
        ));
        assert!(matches!(
            ShroudClientError::from(KeyExchangeError::NetworkUnavailable("down".to_string())),
            ShroudClientError::NetworkUnavailable(_)
        ));
    }
}
