pub mod http;
pub mod key_exchange;
pub mod transport;

pub use http::HttpTransport;
pub use key_exchange::{KeyExchangeClient, KeyExchangeError, NodeKeyProvider, NodePublicKey};
pub use transport::{PendingTransaction, Transport, TransportError};
