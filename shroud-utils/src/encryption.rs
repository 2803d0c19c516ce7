use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, Error as AesError, KeyInit, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;

use crate::constants::{NONCE_SIZE, SALT_SIZE, SYMMETRIC_KEY_SIZE};

type Result<T> = std::result::Result<T, SymmetricError>;

/// Expands an X25519 shared secret into an AES-256-GCM key.
///
/// The envelope salt doubles as the HKDF salt, so both sides of the
/// exchange derive the same symmetric key from the same wire material.
fn expand_key(
    shared_secret: &SharedSecret,
    salt: &[u8; SALT_SIZE],
) -> Result<[u8; SYMMETRIC_KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret.as_bytes());
    let mut symmetric_key = [0u8; SYMMETRIC_KEY_SIZE];
    hkdf.expand(b"", &mut symmetric_key)
        .map_err(SymmetricError::KeyExpansionFailed)?;
    Ok(symmetric_key)
}

/// Encrypts a payload under a key expanded from the shared secret.
///
/// # Arguments
/// * `shared_secret` - X25519 shared secret between client and node
/// * `plaintext` - The data to encrypt
/// * `salt` - Salt for the HKDF key expansion
/// * `nonce` - Nonce for this encryption; must never be reused with the
///   same key material
/// * `aad` - Associated data bound to the ciphertext's authentication tag
///   without being encrypted
///
/// # Returns
/// The ciphertext with the GCM authentication tag appended
///
/// # Errors
/// Returns an error if key expansion or the encryption operation fails.
pub fn encrypt_payload(
    shared_secret: &SharedSecret,
    plaintext: &[u8],
    salt: &[u8; SALT_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let symmetric_key = expand_key(shared_secret, salt)?;
    let cipher = Aes256Gcm::new(&symmetric_key.into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(SymmetricError::EncryptionFailed)
}

/// Decrypts a payload previously produced by [`encrypt_payload`].
///
/// The same shared secret, salt, nonce and associated data used at
/// encryption time must be supplied; any mismatch, or any modification of
/// the ciphertext, fails tag verification.
///
/// # Errors
/// Returns [`SymmetricError::AuthenticationFailed`] if the GCM tag does
/// not verify, which callers must treat as distinct from transport errors.
pub fn decrypt_payload(
    shared_secret: &SharedSecret,
    ciphertext: &[u8],
    salt: &[u8; SALT_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let symmetric_key = expand_key(shared_secret, salt)?;
    let cipher = Aes256Gcm::new(&symmetric_key.into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(SymmetricError::AuthenticationFailed)
}

/// Errors that can occur during the symmetric half of the envelope scheme
#[derive(Debug, thiserror::Error)]
pub enum SymmetricError {
    #[error("Failed to authenticate ciphertext, with error: `{0}`")]
    AuthenticationFailed(AesError),
    #[error("Failed to encrypt plaintext, with error: `{0}`")]
    EncryptionFailed(AesError),
    #[error("Failed to expand key, with error: `{0}`")]
    KeyExpansionFailed(hkdf::InvalidLength),
}

#[cfg(test)]
mod tests {
    use x25519_dalek::{PublicKey, StaticSecret};

    use super::*;

    fn shared_secret_pair() -> (SharedSecret, SharedSecret) {
        let mut rng = rand::thread_rng();
        let client_secret = StaticSecret::random_from_rng(&mut rng);
        let node_secret = StaticSecret::random_from_rng(&mut rng);
        let client_view = client_secret.diffie_hellman(&PublicKey::from(&node_secret));
        let node_view = node_secret.diffie_hellman(&PublicKey::from(&client_secret));
        (client_view, node_view)
    }

    #[test]
    fn test_roundtrip_from_both_sides_of_the_exchange() {
        let (client_view, node_view) = shared_secret_pair();
        let salt = [7u8; SALT_SIZE];
        let nonce = [9u8; NONCE_SIZE];

        let test_cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x60, 0x9f, 0xf1, 0xbd],
            vec![0xab; 1024],
            (0..4096).map(|i| (i % 251) as u8).collect(),
        ];

        for plaintext in test_cases {
            let ciphertext = encrypt_payload(&client_view, &plaintext, &salt, &nonce, b"aad")
                .expect("Encryption should succeed");
            assert_eq!(
                ciphertext.len(),
                plaintext.len() + crate::constants::AUTH_TAG_SIZE,
                "Ciphertext should be plaintext plus the GCM tag"
            );
            let decrypted = decrypt_payload(&node_view, &ciphertext, &salt, &nonce, b"aad")
                .expect("Decryption should succeed");
            assert_eq!(
                decrypted, plaintext,
                "Decrypted payload should match original"
            );
        }
    }

    #[test]
    fn test_mismatched_secret_fails_authentication() {
        let (client_view, _) = shared_secret_pair();
        let (unrelated_view, _) = shared_secret_pair();
        let salt = [1u8; SALT_SIZE];
        let nonce = [2u8; NONCE_SIZE];

        let ciphertext =
            encrypt_payload(&client_view, b"confidential", &salt, &nonce, &[]).unwrap();
        let result = decrypt_payload(&unrelated_view, &ciphertext, &salt, &nonce, &[]);
        assert!(
            matches!(result, Err(SymmetricError::AuthenticationFailed(_))),
            "A mismatched shared secret should never yield plaintext"
        );
    }

    #[test]
    fn test_mismatched_aad_fails_authentication() {
        let (client_view, node_view) = shared_secret_pair();
        let salt = [1u8; SALT_SIZE];
        let nonce = [2u8; NONCE_SIZE];

        let ciphertext =
            encrypt_payload(&client_view, b"confidential", &salt, &nonce, b"header").unwrap();
        let result = decrypt_payload(&node_view, &ciphertext, &salt, &nonce, b"tampered");
        assert!(matches!(
            result,
            Err(SymmetricError::AuthenticationFailed(_))
        ));
    }
}
