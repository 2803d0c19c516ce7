pub mod envelope;
pub mod key_management;

pub use envelope::{open, seal, EncryptedEnvelope, EnvelopeError, DEFAULT_MAX_PAYLOAD_SIZE};
pub use key_management::EphemeralKeyPair;
