//! Cryptographic primitives for the GateKeeper control channel.
//!
//! Provides:
//! - PBKDF2-HMAC-SHA256 key derivation
//! - AES-256-CBC encrypt/decrypt of text and raw bytes
//! - SHA-512 access-key hashing
//! - A cryptographic random-bytes generator
//! - The two-layer [`session::SessionCipher`] (static + salt-chained)

#![deny(unsafe_code)]

pub mod primitives;
pub mod session;

pub use primitives::{
    decrypt_bytes, decrypt_text, derive_key, encrypt_bytes, encrypt_text, fit_to_32,
    hash_access_key, latin1_decode, latin1_encode, random_aes_key, random_bytes, session_day_salt,
    CryptoError, ACCESS_KEY_LABEL, EMPTY_PLAINTEXT_SENTINEL, IV_A, IV_B, SESSION_SALT_IV,
};
pub use session::{
    double_unwrap_session_key, double_wrap_session_key, ChainedCipher, SessionCipher, StaticCipher,
};
