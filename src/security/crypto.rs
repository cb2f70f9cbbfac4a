//! At-rest encryption for TOTP secrets and backup-code sets.
//!
//! ChaCha20-Poly1305 under a single configured key; ciphertexts are stored as
//! `nonce (12 bytes) || ciphertext` with the owning context bound as AAD so a
//! row copied between users fails to decrypt.

use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};

use super::error::SecurityError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct EncryptionService {
    cipher: ChaCha20Poly1305,
}

impl EncryptionService {
    /// Build the service from raw key bytes.
    ///
    /// # Errors
    /// Returns [`SecurityError::Configuration`] unless the key is exactly
    /// 32 bytes. This is checked once at boot; the service refuses to start
    /// without a usable key.
    pub fn new(key: &[u8]) -> Result<Self, SecurityError> {
        if key.len() != KEY_LEN {
            return Err(SecurityError::Configuration(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        })
    }

    /// Build the service from the configured base64 key.
    ///
    /// # Errors
    /// Returns [`SecurityError::Configuration`] when the key is empty,
    /// not valid base64, or the wrong length.
    pub fn from_base64(key: &SecretString) -> Result<Self, SecurityError> {
        let encoded = key.expose_secret().trim();
        if encoded.is_empty() {
            return Err(SecurityError::Configuration(
                "encryption key is not configured".to_string(),
            ));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded))
            .map_err(|_| {
                SecurityError::Configuration("encryption key is not valid base64".to_string())
            })?;
        Self::new(&bytes)
    }

    /// Encrypt `plaintext`, binding `aad` to the ciphertext.
    ///
    /// # Errors
    /// Returns an error if encryption fails.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|err| anyhow::anyhow!("encryption failure: {err}"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext` produced by [`Self::encrypt`].
    ///
    /// # Errors
    /// Returns an error on short input, tampered ciphertext, or wrong AAD.
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> anyhow::Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(anyhow::anyhow!("invalid ciphertext length"));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|err| anyhow::anyhow!("decryption failure: {err}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        EncryptionService::new(&[42u8; 32]).unwrap()
    }

    #[test]
    fn round_trip() {
        let service = service();
        let encrypted = service.encrypt(b"backup-codes", b"user:1").unwrap();
        assert_ne!(encrypted.as_slice(), b"backup-codes");
        let decrypted = service.decrypt(&encrypted, b"user:1").unwrap();
        assert_eq!(decrypted, b"backup-codes");
    }

    #[test]
    fn wrong_aad_fails() {
        let service = service();
        let encrypted = service.encrypt(b"secret", b"user:1").unwrap();
        assert!(service.decrypt(&encrypted, b"user:2").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let service = service();
        let mut encrypted = service.encrypt(b"secret", b"user:1").unwrap();
        let last = encrypted.len() - 1;
        if let Some(byte) = encrypted.get_mut(last) {
            *byte ^= 0xFF;
        }
        assert!(service.decrypt(&encrypted, b"user:1").is_err());
    }

    #[test]
    fn short_input_fails() {
        let service = service();
        assert!(service.decrypt(&[0u8; 4], b"aad").is_err());
    }

    #[test]
    fn wrong_key_length_is_configuration_error() {
        let result = EncryptionService::new(&[1u8; 16]);
        assert!(matches!(result, Err(SecurityError::Configuration(_))));
    }

    #[test]
    fn missing_key_is_fatal() {
        let result = EncryptionService::from_base64(&SecretString::from(""));
        assert!(matches!(result, Err(SecurityError::Configuration(_))));
    }

    #[test]
    fn base64_key_accepted() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        assert!(EncryptionService::from_base64(&SecretString::from(encoded)).is_ok());
    }
}
