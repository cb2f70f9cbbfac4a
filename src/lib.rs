//! # Gatehouse (Authentication & Session Security)
//!
//! `gatehouse` is the authentication and session-security authority for the
//! platform. Every inbound request passes through its gateway pipeline before
//! reaching a route handler.
//!
//! ## Pipeline order
//!
//! 1. IP ban check (cheapest, evaluated first)
//! 2. Identity resolution (session cookie, or bearer token on API routes)
//! 3. Permission check (route policy: public / authenticated / named permission)
//! 4. CSRF validation (state-changing, non-API, non-exempt routes)
//! 5. Two-factor enforcement (sensitive routes, once per session)
//! 6. Sliding-window rate limiting (API routes)
//! 7. Security-event audit logging
//! 8. Security response headers on the way back out
//!
//! ## Token handling
//!
//! Session and CSRF tokens are 32 bytes of CSPRNG output; the database only
//! ever stores the SHA-256 of a session token. Passwords are Argon2id hashes.
//! TOTP secrets and single-use backup codes are encrypted at rest with
//! ChaCha20-Poly1305 under a key that must be configured at boot; a missing
//! key is a startup failure, not a runtime error.
//!
//! ## Throttling
//!
//! Failed logins are counted independently per source IP and per target email,
//! with progressive lockout (base time times `min(count - max + 1, 8)`).
//! Explicit IP bans are a separate, coarser mechanism checked before anything
//! else touches the database.

pub mod api;
pub mod cli;
pub mod security;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
