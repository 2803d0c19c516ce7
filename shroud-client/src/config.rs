use std::{path::Path, time::Duration};

use config::Config;
use serde::{Deserialize, Serialize};
use shroud_envelope::DEFAULT_MAX_PAYLOAD_SIZE;
use shroud_rpc::key_exchange::DEFAULT_KEY_EXCHANGE_METHOD;

/// Configuration for the shielded client.
///
/// The signer's private key is deliberately absent: it comes from the
/// environment only, never from the configuration file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ShroudConfig {
    /// The HTTP URL of the confidential node's JSON-RPC endpoint
    endpoint: String,

    /// The RPC method used to fetch the node's encryption key;
    /// chain-specific, hence configurable
    #[serde(default = "default_key_exchange_method")]
    key_exchange_method: String,

    /// Maximum time to wait for any single RPC request
    #[serde(default)]
    request_timeout_secs: Option<u64>,

    /// How long a fetched node key may be served from cache; zero
    /// disables caching, so every operation fetches a fresh key
    #[serde(default)]
    key_cache_ttl_secs: u64,

    /// Upper bound on the plaintext carried by one envelope
    #[serde(default = "default_max_payload_size")]
    max_payload_size: usize,

    /// Gas limit attached to shielded transactions
    #[serde(default = "default_gas_limit")]
    gas_limit: u64,

    /// Interval between receipt polls when confirming a transaction
    #[serde(default = "default_receipt_poll_interval_ms")]
    receipt_poll_interval_ms: u64,

    /// How many receipt polls to attempt before giving up
    #[serde(default = "default_receipt_poll_attempts")]
    receipt_poll_attempts: u32,
}

fn default_key_exchange_method() -> String {
    DEFAULT_KEY_EXCHANGE_METHOD.to_string()
}

const fn default_max_payload_size() -> usize {
    DEFAULT_MAX_PAYLOAD_SIZE
}

const fn default_gas_limit() -> u64 {
    1_000_000
}

const fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

const fn default_receipt_poll_attempts() -> u32 {
    30
}

impl ShroudConfig {
    /// Creates a configuration for the given endpoint with default values
    /// everywhere else.
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            key_exchange_method: default_key_exchange_method(),
            request_timeout_secs: None,
            key_cache_ttl_secs: 0,
            max_payload_size: default_max_payload_size(),
            gas_limit: default_gas_limit(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            receipt_poll_attempts: default_receipt_poll_attempts(),
        }
    }

    /// Loads the configuration from a file path, with `SHROUD__`-prefixed
    /// environment variables taking precedence.
    ///
    /// # Panics
    ///
    /// This function will panic if the configuration file is not found or
    /// if the configuration is invalid.
    pub fn from_file_path<P: AsRef<Path>>(config_file_path: P) -> Self {
        let builder = Config::builder()
            .add_source(config::File::with_name(
                config_file_path.as_ref().to_str().unwrap(),
            ))
            .add_source(
                config::Environment::with_prefix("SHROUD")
                    .keep_prefix(true)
                    .separator("__"),
            );

        let config = builder
            .build()
            .expect("Failed to generate shroud configuration file");
        config
            .get::<Self>("shroud")
            .expect("Failed to generate configuration instance")
    }

    /// Getter for `endpoint`
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    /// Getter for `key_exchange_method`
    #[must_use]
    pub fn key_exchange_method(&self) -> String {
        self.key_exchange_method.clone()
    }

    /// Getter for `request_timeout`
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Getter for `key_cache_ttl`
    #[must_use]
    pub const fn key_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.key_cache_ttl_secs)
    }

    /// Getter for `max_payload_size`
    #[must_use]
    pub const fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Getter for `gas_limit`
    #[must_use]
    pub const fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Getter for `receipt_poll_interval`
    #[must_use]
    pub const fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Getter for `receipt_poll_attempts`
    #[must_use]
    pub const fn receipt_poll_attempts(&self) -> u32 {
        self.receipt_poll_attempts
    }
}
