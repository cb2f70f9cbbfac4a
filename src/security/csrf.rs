//! Per-session CSRF token sets.
//!
//! A session may hold several simultaneously valid tokens so that multiple
//! open forms or tabs keep working. Expired entries are swept opportunistically
//! on every call; a dedicated sweep also runs from the background task.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::tokens::generate_token;

/// Header carrying the CSRF token for non-form requests.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Form field and query parameter name.
pub const CSRF_FIELD: &str = "csrf_token";

pub struct CsrfGuard {
    pool: PgPool,
    ttl_seconds: i64,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(pool: PgPool, ttl_seconds: i64) -> Self {
        Self { pool, ttl_seconds }
    }

    /// Append a fresh token to the session's set. Prior unexpired tokens stay
    /// valid.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn generate_token(&self, session_hash: &[u8]) -> Result<String> {
        self.sweep_session(session_hash).await?;
        let token = generate_token()?;
        let query = "INSERT INTO csrf_tokens (session_hash, token) VALUES ($1, $2)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_hash)
            .bind(&token)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert csrf token")?;
        Ok(token)
    }

    /// Return an existing unexpired token, or generate one.
    ///
    /// Idempotent issuance: navigating between pages must not silently
    /// invalidate forms already open in other tabs.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn get_token(&self, session_hash: &[u8]) -> Result<String> {
        self.sweep_session(session_hash).await?;
        let query = r"
            SELECT token FROM csrf_tokens
            WHERE session_hash = $1
            ORDER BY issued_at DESC
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup csrf token")?;

        match row {
            Some(row) => Ok(row.get("token")),
            None => self.generate_token(session_hash).await,
        }
    }

    /// True iff the token is in the session's set and younger than the TTL.
    ///
    /// # Errors
    /// Returns an error on store failure; callers treat that as invalid.
    pub async fn validate_token(&self, session_hash: &[u8], token: &str) -> Result<bool> {
        self.sweep_session(session_hash).await?;
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM csrf_tokens
                WHERE session_hash = $1
                  AND token = $2
                  AND issued_at > NOW() - ($3 * INTERVAL '1 second')
            ) AS valid
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session_hash)
            .bind(token)
            .bind(self.ttl_seconds)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to validate csrf token")?;
        Ok(row.get("valid"))
    }

    /// Invalidate the presented token and issue a fresh one. Used on login
    /// and logout to defeat session fixation.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn rotate_token(
        &self,
        session_hash: &[u8],
        presented: Option<&str>,
    ) -> Result<String> {
        if let Some(token) = presented {
            let query = "DELETE FROM csrf_tokens WHERE session_hash = $1 AND token = $2";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(session_hash)
                .bind(token)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to delete presented csrf token")?;
        }
        self.generate_token(session_hash).await
    }

    /// Drop the whole token set for a session (logout).
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn clear_session(&self, session_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM csrf_tokens WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear csrf tokens")?;
        Ok(())
    }

    /// Global sweep of expired tokens across all sessions.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let query = r"
            DELETE FROM csrf_tokens
            WHERE issued_at <= NOW() - ($1 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(self.ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to cleanup csrf tokens")?;
        Ok(result.rows_affected())
    }

    async fn sweep_session(&self, session_hash: &[u8]) -> Result<()> {
        let query = r"
            DELETE FROM csrf_tokens
            WHERE session_hash = $1
              AND issued_at <= NOW() - ($2 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_hash)
            .bind(self.ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep session csrf tokens")?;
        Ok(())
    }
}

/// Extract the presented CSRF token from a request.
///
/// Precedence: form field `csrf_token`, header `X-CSRF-Token`, query
/// parameter — checked in that order. The form body, when present, is passed
/// in pre-buffered by the gateway.
#[must_use]
pub fn presented_token(
    headers: &HeaderMap,
    query: Option<&str>,
    form_body: Option<&[u8]>,
) -> Option<String> {
    if let Some(body) = form_body {
        if let Some(token) = find_pair(body, CSRF_FIELD) {
            return Some(token);
        }
    }
    if let Some(token) = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(token.to_string());
    }
    query.and_then(|raw| find_pair(raw.as_bytes(), CSRF_FIELD))
}

fn find_pair(raw: &[u8], field: &str) -> Option<String> {
    url::form_urlencoded::parse(raw)
        .find(|(key, _)| key == field)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
