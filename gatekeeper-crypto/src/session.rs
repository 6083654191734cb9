//! The two-layer GateKeeper session cipher.
//!
//! Mirrors the shape of an MTProto `EncryptedSession`: key material plus
//! mutable per-message counters, exposing `encrypt_message`/`decrypt_message`.
//! Unlike MTProto's msg-key scheme, the per-message IV ("salt") here is
//! derived from a deterministic seed pair rather than transmitted, so both
//! peers must advance it in lockstep (see [`ChainedCipher`]).

use sha2::{Digest, Sha256};
use zeroize::ZeroizeOnDrop;

use crate::primitives::{
    decrypt_bytes, decrypt_text, derive_key, encrypt_bytes, encrypt_text, fit_to_32, latin1_encode,
    CryptoError, IV_A, IV_B,
};

/// The static layer: keyed from the access key alone, used only to wrap the
/// exchange key and the session key during key exchange (§4.2).
#[derive(ZeroizeOnDrop)]
pub struct StaticCipher {
    key: [u8; 32],
}

impl StaticCipher {
    /// Derive the static key: `PBKDF2(accessKey, ivA, 100_000, 32)`.
    pub fn new(access_key: &[u8]) -> Result<Self, CryptoError> {
        let derived = derive_key(access_key, &IV_A, 100_000, 32)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&derived);
        Ok(Self { key })
    }

    /// Wrap `data` under the static key (`ivA` doubles as the AES IV).
    pub fn wrap(&self, data: &[u8]) -> Vec<u8> {
        encrypt_bytes(&self.key, data, &IV_A)
    }

    /// Inverse of [`StaticCipher::wrap`].
    pub fn unwrap(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        decrypt_bytes(&self.key, data, &IV_A)
    }
}

/// Wrap `session_key` the way the server replies to a key-exchange envelope:
/// `encryptBytes(exchangeKey, encryptBytes(staticKey, sessionKey))`.
pub fn double_wrap_session_key(
    static_cipher: &StaticCipher,
    exchange_key: &[u8],
    session_key: &[u8; 32],
) -> Vec<u8> {
    let inner = static_cipher.wrap(session_key);
    encrypt_bytes_with_any_key(exchange_key, &inner)
}

/// Inverse of [`double_wrap_session_key`], used by the client.
pub fn double_unwrap_session_key(
    static_cipher: &StaticCipher,
    exchange_key: &[u8],
    wrapped: &[u8],
) -> Result<[u8; 32], CryptoError> {
    let inner = decrypt_bytes_with_any_key(exchange_key, wrapped)?;
    let key_bytes = static_cipher.unwrap(&inner)?;
    Ok(fit_to_32(&key_bytes))
}

fn encrypt_bytes_with_any_key(key: &[u8], data: &[u8]) -> Vec<u8> {
    encrypt_bytes(&fit_to_32(key), data, &IV_A)
}

fn decrypt_bytes_with_any_key(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    decrypt_bytes(&fit_to_32(key), data, &IV_A)
}

fn csv(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// The chained layer: rotates a salt (IV) per message from a deterministic
/// seed pair, so both peers advance in lockstep without transmitting IVs.
///
/// `seed1` is the server's listening port (agreed out of band — the server
/// uses its own port, the client uses the remote port it connected to).
/// `seed2` is the current UTC-midnight timestamp in milliseconds.
#[derive(ZeroizeOnDrop)]
pub struct ChainedCipher {
    #[zeroize(skip)]
    seed1: u32,
    #[zeroize(skip)]
    seed2: i64,
    #[zeroize(skip)]
    index: u32,
    session_key: Option<[u8; 32]>,
    last_salt: Option<[u8; 16]>,
}

impl ChainedCipher {
    /// Construct a fresh chain. `session_key` is installed later, once key
    /// exchange completes, via [`ChainedCipher::set_session_key`].
    pub fn new(seed1: u32, seed2: i64) -> Self {
        Self {
            seed1,
            seed2,
            index: 0,
            session_key: None,
            last_salt: None,
        }
    }

    /// Install the session key negotiated during key exchange.
    pub fn set_session_key(&mut self, key: [u8; 32]) {
        self.session_key = Some(key);
    }

    /// Whether a session key has been installed.
    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// The negotiated session key, if key exchange has completed.
    pub fn session_key(&self) -> Option<[u8; 32]> {
        self.session_key
    }

    /// The current message index (0-based, incremented per advanced salt).
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Advance and return the salt for the *next* message (spec §4.2 steps 1–7).
    fn advance_salt(&mut self) -> Result<[u8; 16], CryptoError> {
        let (iv_mix, password, iterations) = match self.last_salt {
            None => {
                let mut iv_mix = [0u8; 16];
                for i in 0..16 {
                    iv_mix[i] = IV_A[i] ^ IV_B[i];
                }
                let password = format!(
                    "{}:{}:{}\n{}\n{}",
                    self.seed1,
                    self.seed2,
                    self.index,
                    csv(&IV_A),
                    csv(&IV_B)
                );
                (iv_mix, password, 1000u32)
            }
            Some(prev_salt) => {
                self.index += 1;
                let mut iv_mix = [0u8; 16];
                for i in 0..16 {
                    let a = prev_salt[i].wrapping_mul(IV_A[i]);
                    let b = prev_salt[i].wrapping_mul(IV_B[i]);
                    iv_mix[i] = a ^ b;
                }
                let password = format!(
                    "{}:{}:{}\n{}\n{}\n{}",
                    self.seed1,
                    self.seed2,
                    self.index,
                    csv(&IV_A),
                    csv(&IV_B),
                    csv(&iv_mix)
                );
                (iv_mix, password, 1000u32 + self.index)
            }
        };

        let digest = Sha256::digest(latin1_encode(&password)?);
        let salt_vec = derive_key(digest.as_slice(), &iv_mix, iterations, 16)?;
        let mut salt = [0u8; 16];
        salt.copy_from_slice(&salt_vec);
        self.last_salt = Some(salt);
        Ok(salt)
    }

    /// Encrypt a plaintext message, advancing the salt first.
    pub fn encrypt_message(&mut self, msg: &str) -> Result<String, CryptoError> {
        let key = self.session_key.ok_or(CryptoError::KeyDerivation)?;
        let salt = self.advance_salt()?;
        Ok(encrypt_text(&key, msg, &salt))
    }

    /// Decrypt a ciphertext message, advancing the salt first.
    pub fn decrypt_message(&mut self, enc: &str) -> Result<String, CryptoError> {
        let key = self.session_key.ok_or(CryptoError::KeyDerivation)?;
        let salt = self.advance_salt()?;
        decrypt_text(&key, enc, &salt)
    }
}

/// Combines the static and chained layers for one connection.
pub struct SessionCipher {
    pub static_cipher: StaticCipher,
    pub chained: ChainedCipher,
}

impl SessionCipher {
    /// Construct from an access key plus the seed pair for this connection.
    pub fn new(access_key: &[u8], seed1: u32, seed2: i64) -> Result<Self, CryptoError> {
        Ok(Self {
            static_cipher: StaticCipher::new(access_key)?,
            chained: ChainedCipher::new(seed1, seed2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_ciphers_with_same_seeds_produce_identical_salt_sequences() {
        let mut a = ChainedCipher::new(2243, 1_700_000_000_000);
        let mut b = ChainedCipher::new(2243, 1_700_000_000_000);
        for _ in 0..5 {
            let sa = a.advance_salt().unwrap();
            let sb = b.advance_salt().unwrap();
            assert_eq!(sa, sb);
        }
    }

    #[test]
    fn different_seed2_diverges() {
        let mut a = ChainedCipher::new(2243, 1_700_000_000_000);
        let mut b = ChainedCipher::new(2243, 1_700_000_086_400_000);
        assert_ne!(a.advance_salt().unwrap(), b.advance_salt().unwrap());
    }

    #[test]
    fn client_and_server_chained_channel_round_trips() {
        let session_key = [9u8; 32];
        let mut server = ChainedCipher::new(2243, 42);
        let mut client = ChainedCipher::new(2243, 42);
        server.set_session_key(session_key);
        client.set_session_key(session_key);

        for msg in ["block: true", "", "list ports"] {
            let ct = server.encrypt_message(msg).unwrap();
            let pt = client.decrypt_message(&ct).unwrap();
            assert_eq!(pt, msg);
        }
    }

    #[test]
    fn static_cipher_wraps_and_unwraps() {
        let access_key = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let cipher = StaticCipher::new(access_key).unwrap();
        let data = b"thirty-two-byte-exchange-key!!!!";
        let wrapped = cipher.wrap(data);
        let unwrapped = cipher.unwrap(&wrapped).unwrap();
        assert_eq!(&unwrapped, data);
    }

    #[test]
    fn session_key_double_wrap_round_trips() {
        let access_key = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let static_cipher = StaticCipher::new(access_key).unwrap();
        let exchange_key = crate::primitives::random_bytes(32);
        let session_key = [5u8; 32];

        let wrapped = double_wrap_session_key(&static_cipher, &exchange_key, &session_key);
        let recovered =
            double_unwrap_session_key(&static_cipher, &exchange_key, &wrapped).unwrap();
        assert_eq!(recovered, session_key);
    }
}
