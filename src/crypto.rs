use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Symmetric encryptor for OAuth token secrets at rest. The nonce is
/// derived from the key and plaintext, making ciphertexts deterministic:
/// lookups by secret encrypt the probe and compare ciphertext equality in
/// SQL. Stateless after construction, safe to share across tasks.
#[derive(Clone)]
pub struct TokenEncryptor {
    cipher: ChaCha20Poly1305,
    key: [u8; KEY_LEN],
}

impl TokenEncryptor {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        TokenEncryptor {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            key,
        }
    }

    pub fn from_slice(key: &[u8]) -> CoreResult<Self> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CoreError::Encryption(format!("key must be {KEY_LEN} bytes")))?;
        Ok(TokenEncryptor::new(key))
    }

    fn derive_nonce(&self, plaintext: &[u8]) -> [u8; NONCE_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(plaintext);
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }

    /// Returns base64 of `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        let nonce_bytes = self.derive_nonce(plaintext.as_bytes());
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|err| CoreError::Encryption(err.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> CoreResult<String> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|err| CoreError::Encryption(err.to_string()))?;
        if combined.len() < NONCE_LEN {
            return Err(CoreError::Encryption("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|err| CoreError::Encryption(err.to_string()))?;
        String::from_utf8(plaintext).map_err(|err| CoreError::Encryption(err.to_string()))
    }
}

impl std::fmt::Debug for TokenEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEncryptor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor() -> TokenEncryptor {
        TokenEncryptor::new([7u8; KEY_LEN])
    }

    #[test]
    fn round_trip_recovers_plaintext() {
        let enc = encryptor();
        let ciphertext = enc.encrypt("super-secret-access-token").unwrap();
        assert_ne!(ciphertext, "super-secret-access-token");
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), "super-secret-access-token");
    }

    #[test]
    fn same_plaintext_same_ciphertext() {
        let enc = encryptor();
        assert_eq!(enc.encrypt("probe").unwrap(), enc.encrypt("probe").unwrap());
    }

    #[test]
    fn different_keys_disagree() {
        let a = TokenEncryptor::new([1u8; KEY_LEN]);
        let b = TokenEncryptor::new([2u8; KEY_LEN]);
        let ciphertext = a.encrypt("token").unwrap();
        assert!(b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        assert!(TokenEncryptor::from_slice(&[0u8; 16]).is_err());
        assert!(TokenEncryptor::from_slice(&[0u8; KEY_LEN]).is_ok());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let enc = encryptor();
        let mut raw = BASE64.decode(enc.encrypt("token").unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(enc.decrypt(&BASE64.encode(raw)).is_err());
    }
}
