use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

/// Single-use X25519 key material for one shielded operation.
///
/// A fresh pair must be generated for every shielded call or transaction;
/// reusing a pair across operations would let an observer correlate
/// otherwise unrelated requests. The pair is dropped at the end of the
/// round trip, together with the shared secret derived from it.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
}

impl EphemeralKeyPair {
    /// Generates a fresh key pair from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let secret = StaticSecret::random_from_rng(&mut rng);
        Self { secret }
    }

    /// Builds a key pair from a raw scalar.
    ///
    /// Only useful for reproducing fixed envelopes in tests; production
    /// callers always go through [`EphemeralKeyPair::generate`].
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Returns the public half of the pair, carried in the envelope so the
    /// node can derive the same shared secret.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    /// Derives the shared secret between this pair and the node's public key.
    ///
    /// The returned secret must be threaded through the whole round trip:
    /// the secret that encrypted a request is the only one that can decrypt
    /// its response, and re-deriving it from a freshly fetched node key
    /// could silently pick up a rotated key.
    #[must_use]
    pub fn diffie_hellman(&self, node_public_key: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(node_public_key)
    }
}
