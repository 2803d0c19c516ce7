use shroud_utils::{
    constants::{DH_PUBLIC_KEY_SIZE, NONCE_SIZE, SALT_SIZE},
    encryption::{decrypt_payload, encrypt_payload, SymmetricError},
};
use x25519_dalek::{PublicKey, SharedSecret};

type Result<T> = std::result::Result<T, EnvelopeError>;

/// Fixed-size prefix of every envelope: client public key, salt, nonce
pub const HEADER_SIZE: usize = DH_PUBLIC_KEY_SIZE + SALT_SIZE + NONCE_SIZE;

/// Default upper bound on the plaintext carried by one envelope.
///
/// Bounded by what an EVM transaction's `data` field can realistically
/// carry through the underlying JSON-RPC transport; the actual limit is
/// part of the client configuration surface.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 128 * 1024;

/// The self-describing wire form of a shielded payload.
///
/// Layout on the wire, in order:
///
/// ```text
/// client_public_key (32) || salt (16) || nonce (12) || ciphertext (len + 16)
/// ```
///
/// The whole byte string becomes the `data` field of a call or
/// transaction. The header is bound to the ciphertext as associated data,
/// so flipping any bit of the envelope fails authentication on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// The client's ephemeral X25519 public key, carried so the node can
    /// derive the same shared secret
    pub client_public_key: [u8; DH_PUBLIC_KEY_SIZE],

    /// Salt used in the HKDF key expansion
    pub salt: [u8; SALT_SIZE],

    /// Nonce used by the AES-GCM encryption
    pub nonce: [u8; NONCE_SIZE],

    /// The encrypted payload, with the authentication tag appended
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Serializes the envelope into its wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.client_public_key);
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parses an envelope from its wire form.
    ///
    /// # Errors
    /// Returns [`EnvelopeError::Truncated`] if the byte string is shorter
    /// than the fixed header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(EnvelopeError::Truncated {
                length: bytes.len(),
            });
        }
        let mut client_public_key = [0u8; DH_PUBLIC_KEY_SIZE];
        client_public_key.copy_from_slice(&bytes[..DH_PUBLIC_KEY_SIZE]);
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[DH_PUBLIC_KEY_SIZE..DH_PUBLIC_KEY_SIZE + SALT_SIZE]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[DH_PUBLIC_KEY_SIZE + SALT_SIZE..HEADER_SIZE]);
        Ok(Self {
            client_public_key,
            salt,
            nonce,
            ciphertext: bytes[HEADER_SIZE..].to_vec(),
        })
    }
}

/// Encrypts a payload into an envelope, with fresh random salt and nonce.
///
/// # Arguments
/// * `shared_secret` - The secret derived once for this operation; the
///   caller must keep it to open the response
/// * `client_public_key` - Public half of the ephemeral pair the secret
///   was derived from
/// * `plaintext` - The ABI-encoded call data; opaque bytes to this layer
/// * `max_payload_size` - Upper bound on `plaintext.len()`
///
/// # Errors
/// * [`EnvelopeError::PayloadTooLarge`] if the plaintext exceeds the bound
/// * [`EnvelopeError::Symmetric`] if the underlying encryption fails
pub fn seal(
    shared_secret: &SharedSecret,
    client_public_key: PublicKey,
    plaintext: &[u8],
    max_payload_size: usize,
) -> Result<EncryptedEnvelope> {
    let salt = rand::random::<[u8; SALT_SIZE]>();
    let nonce = rand::random::<[u8; NONCE_SIZE]>();
    seal_with_entropy(
        shared_secret,
        client_public_key,
        plaintext,
        max_payload_size,
        salt,
        nonce,
    )
}

/// Deterministic form of [`seal`] with caller-supplied salt and nonce.
///
/// The salt/nonce pair must never be reused with the same key material;
/// outside of fixed-vector tests, always go through [`seal`].
pub fn seal_with_entropy(
    shared_secret: &SharedSecret,
    client_public_key: PublicKey,
    plaintext: &[u8],
    max_payload_size: usize,
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
) -> Result<EncryptedEnvelope> {
    if plaintext.len() > max_payload_size {
        return Err(EnvelopeError::PayloadTooLarge {
            length: plaintext.len(),
            max: max_payload_size,
        });
    }
    let client_public_key = *client_public_key.as_bytes();
    let ciphertext = encrypt_payload(
        shared_secret,
        plaintext,
        &salt,
        &nonce,
        &client_public_key,
    )?;
    Ok(EncryptedEnvelope {
        client_public_key,
        salt,
        nonce,
        ciphertext,
    })
}

/// Decrypts an envelope's wire form back into the original payload.
///
/// The shared secret must be the exact one used when the envelope was
/// sealed. The embedded public key is not used for derivation here (it is
/// for the remote side); it participates only as associated data.
///
/// # Errors
/// * [`EnvelopeError::Truncated`] if the bytes do not contain a full header
/// * [`EnvelopeError::Symmetric`] wrapping an authentication failure if the
///   tag does not verify, which signals tampering, a mismatched secret or a
///   rotated node key
pub fn open(shared_secret: &SharedSecret, envelope_bytes: &[u8]) -> Result<Vec<u8>> {
    let envelope = EncryptedEnvelope::from_bytes(envelope_bytes)?;
    let plaintext = decrypt_payload(
        shared_secret,
        &envelope.ciphertext,
        &envelope.salt,
        &envelope.nonce,
        &envelope.client_public_key,
    )?;
    Ok(plaintext)
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Payload of {length} bytes exceeds the configured maximum of {max} bytes")]
    PayloadTooLarge { length: usize, max: usize },
    #[error("Envelope of {length} bytes is shorter than the fixed header")]
    Truncated { length: usize },
    #[error("Symmetric encryption error: `{0}`")]
    Symmetric(#[from] SymmetricError),
}

impl EnvelopeError {
    /// Whether this error is an integrity-check failure rather than a
    /// structural one. Callers use this to tell "the key may be stale or
    /// the envelope was tampered with" apart from "this is not an
    /// envelope at all".
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Symmetric(SymmetricError::AuthenticationFailed(_)))
    }
}
