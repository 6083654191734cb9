//! Low-level crypto operations: key derivation, AES-256-CBC, hashing, randomness.

use aes::Aes256;
use base64::{prelude::BASE64_STANDARD, Engine};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Hmac;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Label prepended before hashing an access key (see spec §6).
pub const ACCESS_KEY_LABEL: &str = "GateKeeper.accessKey:";

/// Sentinel text substituted for an empty plaintext before encryption.
pub const EMPTY_PLAINTEXT_SENTINEL: &str = "\r\n";

/// Fixed 16-byte IV labeled "A", shared bit-for-bit between client and server.
pub const IV_A: [u8; 16] = [
    0x1e, 0xa8, 0x19, 0x4f, 0x0e, 0xdd, 0x8f, 0x5c, 0x35, 0x95, 0x3d, 0xad, 0xff, 0xaa, 0x8a, 0xf5,
];

/// Fixed 16-byte IV labeled "B", shared bit-for-bit between client and server.
pub const IV_B: [u8; 16] = [
    0x10, 0x82, 0x39, 0x3e, 0xc8, 0xfd, 0xd4, 0x40, 0x74, 0x76, 0xb5, 0xb9, 0x0b, 0xf5, 0xe9, 0xc6,
];

/// Fixed PBKDF2 salt used by [`session_day_salt`].
pub const SESSION_SALT_IV: [u8; 16] = [
    0xd9, 0xa6, 0x2b, 0x21, 0xa4, 0x67, 0x95, 0x96, 0x42, 0x49, 0xbc, 0x43, 0xb5, 0x79, 0x46, 0xfe,
];

/// Derive the `"session.salt:<utc-midnight-ms>"` day salt named in spec §6.
///
/// Not consumed by [`crate::session::ChainedCipher`] — its explicit salt
/// recipe folds the raw day-ms value into the PBKDF2 password text directly,
/// and that formula is what the cross-peer salt-sequence invariant is tested
/// against. Exposed for callers that want an extra, non-reversible namespace
/// key derived from the same day boundary (e.g. to tag log lines or cache
/// keys without leaking the raw timestamp).
pub fn session_day_salt(utc_midnight_ms: i64) -> Result<[u8; 16], CryptoError> {
    let password = format!("session.salt:{utc_midnight_ms}");
    let mut out = [0u8; 16];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), &SESSION_SALT_IV, 10_000, &mut out)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(out)
}

/// Errors from any crypto operation in this crate.
///
/// Never leaks a partial plaintext: every failure path discards whatever was
/// decrypted so far and reports only the kind of failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// PBKDF2 was asked for an output length its PRF cannot produce.
    KeyDerivation,
    /// Ciphertext length was not a multiple of the AES block size.
    InvalidCiphertextLength,
    /// PKCS#7 unpadding failed — wrong key, wrong IV, or corrupted ciphertext.
    Padding,
    /// The wire value was not valid base64.
    Base64,
    /// A code point outside the Latin-1 range (0–255) was found where a
    /// Latin-1-encoded octet string was expected.
    NotLatin1,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyDerivation => write!(f, "key derivation failed"),
            Self::InvalidCiphertextLength => write!(f, "ciphertext is not block-aligned"),
            Self::Padding => write!(f, "decryption or padding failed"),
            Self::Base64 => write!(f, "invalid base64"),
            Self::NotLatin1 => write!(f, "value is not representable as Latin-1"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Derive a key via PBKDF2-HMAC-SHA256.
///
/// Defaults used by callers: 100 000 iterations, 32-byte output.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    key_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let mut out = vec![0u8; key_len];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(out)
}

/// `SHA-512(SHA-512(label ‖ accessKey))`, optionally re-hashed with a session
/// key: `SHA-512(previous ‖ sessionKey)`.
///
/// Returns the 64-byte digest used both to prove knowledge of the access key
/// (login) and, once a session exists, to bind that proof to the session.
pub fn hash_access_key(access_key: &[u8], session_key: Option<&[u8; 32]>) -> [u8; 64] {
    let mut h = Sha512::new();
    h.update(ACCESS_KEY_LABEL.as_bytes());
    h.update(access_key);
    let once: [u8; 64] = h.finalize().into();

    let mut h2 = Sha512::new();
    h2.update(once);
    let twice: [u8; 64] = h2.finalize().into();

    match session_key {
        None => twice,
        Some(sk) => {
            let mut h3 = Sha512::new();
            h3.update(twice);
            h3.update(sk);
            h3.finalize().into()
        }
    }
}

/// Encrypt `msg` under AES-256-CBC/PKCS7 and return it base64-encoded.
///
/// An empty plaintext is replaced on the wire by the literal `"\r\n"` so that
/// CBC always has at least one block to encrypt; [`decrypt_text`] restores it
/// to the empty string.
pub fn encrypt_text(key: &[u8; 32], msg: &str, iv: &[u8; 16]) -> String {
    let plaintext = if msg.is_empty() {
        EMPTY_PLAINTEXT_SENTINEL.as_bytes()
    } else {
        msg.as_bytes()
    };
    let ct = Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    BASE64_STANDARD.encode(ct)
}

/// Inverse of [`encrypt_text`].
pub fn decrypt_text(key: &[u8; 32], enc: &str, iv: &[u8; 16]) -> Result<String, CryptoError> {
    let ct = BASE64_STANDARD.decode(enc).map_err(|_| CryptoError::Base64)?;
    let pt = decrypt_bytes(key, &ct, iv)?;
    let text = latin1_decode(&pt);
    if text == EMPTY_PLAINTEXT_SENTINEL {
        Ok(String::new())
    } else {
        Ok(text)
    }
}

/// Raw AES-256-CBC/PKCS7 encryption over arbitrary octets (used to wrap keys).
pub fn encrypt_bytes(key: &[u8; 32], data: &[u8], iv: &[u8; 16]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(data)
}

/// Inverse of [`encrypt_bytes`].
pub fn decrypt_bytes(key: &[u8; 32], data: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(CryptoError::InvalidCiphertextLength);
    }
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| CryptoError::Padding)
}

/// Fill a freshly-allocated buffer of `n` bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    getrandom::getrandom(&mut buf).expect("getrandom failed");
    buf
}

/// A random AES key: exactly 32 bytes, or `32 + uniform[0, slack_len)` bytes
/// when `slack_len` is given. Callers that request slack must truncate the
/// result to 32 bytes themselves after any wrapping/unwrapping round-trip.
pub fn random_aes_key(slack_len: Option<usize>) -> Vec<u8> {
    let extra = match slack_len {
        Some(0) | None => 0,
        Some(s) => {
            let b = random_bytes(1)[0] as usize;
            b % s
        }
    };
    random_bytes(32 + extra)
}

/// Truncate (or zero-pad) an arbitrary-length key to exactly 32 bytes.
///
/// Used to fold a [`random_aes_key`] slack tail back down to the fixed AES-256
/// key size once it has served its purpose on the wire.
pub fn fit_to_32(key: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = key.len().min(32);
    out[..n].copy_from_slice(&key[..n]);
    out
}

/// Decode a byte string as Latin-1 text (each octet maps to the Unicode code
/// point of the same value — the wire protocol's "UTF-safe subset").
pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode Latin-1 text back to its raw octets.
///
/// Fails if any character falls outside the Latin-1 range (0–255).
pub fn latin1_encode(s: &str) -> Result<Vec<u8>, CryptoError> {
    s.chars()
        .map(|c| {
            let cp = c as u32;
            if cp <= 0xFF {
                Ok(cp as u8)
            } else {
                Err(CryptoError::NotLatin1)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_key_hash_is_64_bytes_and_deterministic() {
        let key = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let h1 = hash_access_key(key, None);
        let h2 = hash_access_key(key, None);
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, h2);
    }

    #[test]
    fn access_key_hash_hex_encodes_to_128_chars() {
        let key = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let digest = hash_access_key(key, None);
        assert_eq!(hex::encode(digest).len(), 128);
    }

    #[test]
    fn access_key_hash_matches_manual_double_sha512() {
        let key = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut h = Sha512::new();
        h.update(ACCESS_KEY_LABEL.as_bytes());
        h.update(key);
        let once = h.finalize();
        let mut h2 = Sha512::new();
        h2.update(once);
        let expected: [u8; 64] = h2.finalize().into();
        assert_eq!(hash_access_key(key, None), expected);
    }

    #[test]
    fn access_key_hash_changes_with_session_key() {
        let key = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let sk = [7u8; 32];
        let without = hash_access_key(key, None);
        let with = hash_access_key(key, Some(&sk));
        assert_ne!(without, with);
    }

    #[test]
    fn text_round_trips_including_empty() {
        let key = [1u8; 32];
        let iv = [2u8; 16];
        for msg in ["", "hello", "a longer message than one AES block of content"] {
            let ct = encrypt_text(&key, msg, &iv);
            let pt = decrypt_text(&key, &ct, &iv).unwrap();
            assert_eq!(pt, msg);
        }
    }

    #[test]
    fn bytes_round_trip() {
        let key = [3u8; 32];
        let iv = [4u8; 16];
        let data = b"session-key-material-goes-here!";
        let ct = encrypt_bytes(&key, data, &iv);
        let pt = decrypt_bytes(&key, &ct, &iv).unwrap();
        assert_eq!(pt, data);
    }

    #[test]
    fn decrypt_rejects_non_block_aligned_ciphertext() {
        let key = [5u8; 32];
        let iv = [6u8; 16];
        let bad = vec![0u8; 15];
        assert_eq!(
            decrypt_bytes(&key, &bad, &iv),
            Err(CryptoError::InvalidCiphertextLength)
        );
    }

    #[test]
    fn random_aes_key_default_is_32_bytes() {
        assert_eq!(random_aes_key(None).len(), 32);
    }

    #[test]
    fn random_aes_key_with_slack_is_at_least_32_bytes() {
        let k = random_aes_key(Some(16));
        assert!(k.len() >= 32 && k.len() < 32 + 16);
    }

    #[test]
    fn latin1_round_trips_high_bytes() {
        let raw: Vec<u8> = (0u8..=255).collect();
        let s = latin1_decode(&raw);
        let back = latin1_encode(&s).unwrap();
        assert_eq!(raw, back);
    }
}
