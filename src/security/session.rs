//! Session token lifecycle and fingerprint-bound validation.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{warn, Instrument};
use uuid::Uuid;

use super::config::SecurityConfig;
use super::fingerprint::Fingerprint;
use super::tokens::{generate_token, hash_token};

/// Data returned for a valid session token.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub remember_me: bool,
    pub two_factor_verified: bool,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    pool: PgPool,
    session_ttl_seconds: i64,
    remember_me_ttl_seconds: i64,
}

impl SessionStore {
    #[must_use]
    pub fn new(pool: PgPool, config: &SecurityConfig) -> Self {
        Self {
            pool,
            session_ttl_seconds: config.session_ttl_seconds(),
            remember_me_ttl_seconds: config.remember_me_ttl_seconds(),
        }
    }

    #[must_use]
    pub fn effective_ttl_seconds(&self, remember_me: bool) -> i64 {
        if remember_me {
            self.remember_me_ttl_seconds
        } else {
            self.session_ttl_seconds
        }
    }

    /// Issue a new session and return the raw token.
    ///
    /// Only the SHA-256 of the token is persisted, together with the client
    /// fingerprint captured at creation time.
    ///
    /// # Errors
    /// Returns an error if the insert fails or a unique token cannot be
    /// generated in three tries.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        remember_me: bool,
        fingerprint: &Fingerprint,
    ) -> Result<String> {
        let ttl_seconds = self.effective_ttl_seconds(remember_me);
        let query = r"
            INSERT INTO user_sessions
                (session_hash, user_id, ip, ua_fingerprint, remember_me, expires_at)
            VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        for _ in 0..3 {
            let token = generate_token()?;
            let token_hash = hash_token(&token);
            let result = sqlx::query(query)
                .bind(token_hash)
                .bind(user_id)
                .bind(fingerprint.ip.as_deref())
                .bind(&fingerprint.user_agent)
                .bind(remember_me)
                .bind(ttl_seconds)
                .execute(&self.pool)
                .instrument(span.clone())
                .await;

            match result {
                Ok(_) => return Ok(token),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("failed to insert session"),
            }
        }

        Err(anyhow!("failed to generate unique session token"))
    }

    /// Resolve a raw token to its session record.
    ///
    /// A fingerprint mismatch is treated as possible hijacking: the session
    /// is destroyed and `None` is returned, exactly as for an unknown token.
    ///
    /// # Errors
    /// Returns an error only on store failure, never for invalid tokens.
    pub async fn validate_session(
        &self,
        raw_token: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<SessionRecord>> {
        let token_hash = hash_token(raw_token);
        let query = r"
            SELECT users.id, users.email, users.roles,
                   user_sessions.ip, user_sessions.ua_fingerprint,
                   user_sessions.remember_me, user_sessions.expires_at,
                   user_sessions.two_factor_verified_at IS NOT NULL AS two_factor_verified
            FROM user_sessions
            JOIN users ON users.id = user_sessions.user_id
            WHERE user_sessions.session_hash = $1
              AND user_sessions.expires_at > NOW()
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stored_ip: Option<String> = row.get("ip");
        let stored_ua: String = row.get("ua_fingerprint");
        if !fingerprint.matches(stored_ip.as_deref(), &stored_ua) {
            warn!(
                stored_ua = %stored_ua,
                "session fingerprint mismatch, destroying session"
            );
            self.delete_by_hash(&token_hash).await?;
            return Ok(None);
        }

        self.touch_last_activity(&token_hash).await?;

        Ok(Some(SessionRecord {
            user_id: row.get("id"),
            email: row.get("email"),
            roles: row.get("roles"),
            remember_me: row.get("remember_me"),
            two_factor_verified: row.get("two_factor_verified"),
            expires_at: row.get("expires_at"),
        }))
    }

    /// Destroy the session for a raw token. Idempotent.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn destroy_session(&self, raw_token: &str) -> Result<()> {
        self.delete_by_hash(&hash_token(raw_token)).await
    }

    /// Destroy every session belonging to a user (password change, account
    /// compromise response).
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn destroy_all_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete user sessions")?;
        Ok(result.rows_affected())
    }

    /// Extend a remember-me session to a fresh remember-me lifetime.
    ///
    /// Sessions without the remember-me flag are never extended; returns
    /// whether a row was updated.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn extend_session(&self, raw_token: &str) -> Result<bool> {
        let query = r"
            UPDATE user_sessions
            SET expires_at = NOW() + ($2 * INTERVAL '1 second'),
                last_activity_at = NOW()
            WHERE session_hash = $1
              AND remember_me
              AND expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(hash_token(raw_token))
            .bind(self.remember_me_ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to extend session")?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful 2FA verification for the life of this session.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn mark_two_factor_verified(&self, session_hash: &[u8]) -> Result<()> {
        let query = r"
            UPDATE user_sessions
            SET two_factor_verified_at = NOW()
            WHERE session_hash = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to mark session 2fa-verified")?;
        Ok(())
    }

    /// Bulk-delete expired sessions. Pure delete-where-expired, so it is
    /// idempotent and safe to run concurrently with live traffic.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to cleanup expired sessions")?;
        Ok(result.rows_affected())
    }

    async fn delete_by_hash(&self, token_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM user_sessions WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn touch_last_activity(&self, token_hash: &[u8]) -> Result<()> {
        let query = r"
            UPDATE user_sessions
            SET last_activity_at = NOW()
            WHERE session_hash = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update session activity")?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::config::SecurityConfig;
    use secrecy::SecretString;

    fn store() -> SessionStore {
        let config = SecurityConfig::new(
            "https://stories.example".to_string(),
            SecretString::from("key"),
        )
        .with_session_ttl_seconds(3600)
        .with_remember_me_ttl_seconds(86400);
        // Lazy pools never connect until used, but constructing one still
        // needs a Tokio context.
        let pool = PgPool::connect_lazy("postgres://localhost/unused").expect("valid test dsn");
        SessionStore::new(pool, &config)
    }

    #[tokio::test]
    async fn effective_ttl_follows_remember_me() {
        let store = store();
        assert_eq!(store.effective_ttl_seconds(false), 3600);
        assert_eq!(store.effective_ttl_seconds(true), 86400);
    }

    #[test]
    fn session_record_holds_values() {
        let record = SessionRecord {
            user_id: Uuid::nil(),
            email: "reader@example.com".to_string(),
            roles: vec!["admin".to_string()],
            remember_me: true,
            two_factor_verified: false,
            expires_at: Utc::now(),
        };
        assert_eq!(record.user_id, Uuid::nil());
        assert!(record.remember_me);
        assert!(!record.two_factor_verified);
    }
}
