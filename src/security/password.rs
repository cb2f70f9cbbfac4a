//! Argon2id credential hashing and verification.

use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::rngs::OsRng;
use tracing::warn;

/// Hashes and verifies passwords under the current Argon2id policy.
pub struct CredentialVerifier {
    params: Params,
}

impl Default for CredentialVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVerifier {
    #[must_use]
    pub fn new() -> Self {
        // Current policy: the argon2 crate defaults (19 MiB, t=2, p=1).
        Self {
            params: Params::default(),
        }
    }

    fn hasher(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password for storage. Always Argon2id, never reversible.
    ///
    /// # Errors
    /// Returns an error if hashing fails (effectively only on broken RNG).
    pub fn hash(&self, password: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .hasher()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?
            .to_string();
        Ok(hash)
    }

    /// Verify a password against a stored hash.
    ///
    /// Any internal error (unparseable hash, wrong algorithm) is treated as a
    /// verification failure rather than surfaced to the caller.
    #[must_use]
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            warn!("stored password hash is unparseable");
            return false;
        };
        self.hasher()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// True when the stored hash is below current policy and should be
    /// replaced on the next successful login.
    #[must_use]
    pub fn needs_rehash(&self, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return true;
        };
        if parsed.algorithm != argon2::ARGON2ID_IDENT {
            return true;
        }
        let Ok(params) = Params::try_from(&parsed) else {
            return true;
        };
        params.m_cost() < self.params.m_cost()
            || params.t_cost() < self.params.t_cost()
            || params.p_cost() < self.params.p_cost()
    }
}
