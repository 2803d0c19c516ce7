/// Size of the AES-256-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the HKDF salt carried in each envelope, in bytes
pub const SALT_SIZE: usize = 16;

/// Size of an X25519 public key in bytes
pub const DH_PUBLIC_KEY_SIZE: usize = 32;

/// Size of the symmetric key expanded from the shared secret, in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of the AES-GCM authentication tag appended to every ciphertext, in bytes
pub const AUTH_TAG_SIZE: usize = 16;
