//! Security components and the request-gating pipeline.
//!
//! Each component owns one concern and one slice of persistent state:
//!
//! - [`password::CredentialVerifier`] — Argon2id hashing and verification.
//! - [`session::SessionStore`] — session token lifecycle and fingerprint binding.
//! - [`throttle::LoginThrottle`] — progressive lockout, IP bans, rate limiting.
//! - [`csrf::CsrfGuard`] — per-session CSRF token sets.
//! - [`two_factor::TwoFactorVerifier`] — TOTP and single-use backup codes.
//! - [`gateway`] — the ordered pipeline composing all of the above.
//!
//! The persistent store is the only shared resource; no component keeps
//! mutable in-process state, so the pipeline stays stateless per request.

pub mod config;
pub mod crypto;
pub mod csrf;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod identity;
pub mod password;
pub mod policy;
pub mod session;
pub mod sweeper;
pub mod throttle;
pub(crate) mod tokens;
pub mod two_factor;

use std::sync::Arc;

use sqlx::PgPool;

pub use config::SecurityConfig;
pub use error::SecurityError;
pub use identity::{Identity, SessionContext};
pub use policy::{Access, RoutePolicy};

/// Bundle of all security components, shared as pipeline/handler state.
pub struct Security {
    config: SecurityConfig,
    policy: RoutePolicy,
    verifier: password::CredentialVerifier,
    sessions: session::SessionStore,
    throttle: throttle::LoginThrottle,
    csrf: csrf::CsrfGuard,
    two_factor: two_factor::TwoFactorVerifier,
}

impl Security {
    /// Assemble all components from configuration.
    ///
    /// # Errors
    /// Returns [`SecurityError::Configuration`] when the encryption key is
    /// missing or malformed; the service must not start without it.
    pub fn new(pool: PgPool, config: SecurityConfig) -> Result<Self, SecurityError> {
        let encryption = Arc::new(crypto::EncryptionService::from_base64(
            config.encryption_key(),
        )?);
        let policy = RoutePolicy::from_config(&config);
        let sessions = session::SessionStore::new(pool.clone(), &config);
        let throttle = throttle::LoginThrottle::new(pool.clone(), &config);
        let csrf = csrf::CsrfGuard::new(pool.clone(), config.csrf_ttl_seconds());
        let two_factor = two_factor::TwoFactorVerifier::new(
            pool,
            encryption,
            config.totp_issuer().to_string(),
        );

        Ok(Self {
            config,
            policy,
            verifier: password::CredentialVerifier::new(),
            sessions,
            throttle,
            csrf,
            two_factor,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    #[must_use]
    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    #[must_use]
    pub fn verifier(&self) -> &password::CredentialVerifier {
        &self.verifier
    }

    #[must_use]
    pub fn sessions(&self) -> &session::SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn throttle(&self) -> &throttle::LoginThrottle {
        &self.throttle
    }

    #[must_use]
    pub fn csrf(&self) -> &csrf::CsrfGuard {
        &self.csrf
    }

    #[must_use]
    pub fn two_factor(&self) -> &two_factor::TwoFactorVerifier {
        &self.two_factor
    }
}
