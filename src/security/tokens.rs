//! Token generation and hashing shared by sessions and CSRF.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Create an opaque token from 32 bytes of CSPRNG output.
///
/// The raw value is only ever handed to the client; persistent storage keeps
/// the hash.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token so raw values never touch the database.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    #[test]
    fn generate_token_is_32_random_bytes() {
        let decoded_len = generate_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn generate_token_does_not_repeat() {
        let first = generate_token().ok();
        let second = generate_token().ok();
        assert!(first.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn hash_token_stable_and_distinct() {
        let first = hash_token("token");
        let second = hash_token("token");
        let different = hash_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn hash_differs_from_raw_token() {
        let token = generate_token().ok().unwrap_or_default();
        let hash = hash_token(&token);
        assert_ne!(hash, token.as_bytes());
    }
}
