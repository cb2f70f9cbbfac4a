//! Progressive login throttling, explicit IP bans, and rate limiting.
//!
//! Every failed login increments two independent rows: one keyed by source IP
//! and one keyed by target email. Either track locking out is enough to block
//! the attempt, which defends against both credential stuffing from one IP
//! and distributed brute force against one account.
//!
//! Lockout duration grows with the failure count: `lockout × multiplier`
//! where `multiplier = min(count - max + 1, 8)`. The multiplier never decays
//! on its own; only a successful login (or the sweep purging stale rows)
//! resets a track.
//!
//! The increment is an atomic upsert (`ON CONFLICT .. DO UPDATE`), so
//! concurrent failures against the same identifier cannot lose updates.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::{info, Instrument};

use super::config::SecurityConfig;

const LOCKOUT_MULTIPLIER_CAP: i64 = 8;
const STALE_ATTEMPT_SECONDS: i64 = 3600;

/// Totals removed by one throttle sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub attempts: u64,
    pub bans: u64,
    pub rate_limit_events: u64,
}

pub struct LoginThrottle {
    pool: PgPool,
    max_attempts: i64,
    lockout_seconds: i64,
    rate_limit_retention_seconds: i64,
    whitelisted_ips: Vec<String>,
}

impl LoginThrottle {
    #[must_use]
    pub fn new(pool: PgPool, config: &SecurityConfig) -> Self {
        Self {
            pool,
            max_attempts: config.max_attempts(),
            lockout_seconds: config.lockout_seconds(),
            // Keep rate-limit events around for the longest plausible window.
            rate_limit_retention_seconds: config.api_rate_limit_window_seconds().max(86400),
            whitelisted_ips: config.whitelisted_ips().to_vec(),
        }
    }

    /// Lockout duration for a given attempt count, in seconds.
    ///
    /// Non-decreasing in `count` and capped at 8x the base lockout time.
    #[must_use]
    pub fn lockout_duration_seconds(&self, attempt_count: i64) -> i64 {
        let multiplier = (attempt_count - self.max_attempts + 1)
            .max(1)
            .min(LOCKOUT_MULTIPLIER_CAP);
        self.lockout_seconds * multiplier
    }

    /// Ops/monitoring addresses bypass throttle checks entirely.
    #[must_use]
    pub fn is_whitelisted(&self, ip: &str) -> bool {
        self.whitelisted_ips.iter().any(|entry| entry == ip)
    }

    /// Record one authentication failure against both identifier tracks.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn record_failure(&self, ip: &str, email: &str) -> Result<()> {
        self.record_identifier_failure(&ip_key(ip)).await?;
        self.record_identifier_failure(&email_key(email)).await?;
        Ok(())
    }

    /// Clear both tracks after a successful authentication. Full reset, not a
    /// decrement.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn record_success(&self, ip: &str, email: &str) -> Result<()> {
        let query = "DELETE FROM login_attempts WHERE identifier = ANY($1)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(vec![ip_key(ip), email_key(email)])
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to reset login attempts")?;
        Ok(())
    }

    /// True while the IP track is locked out.
    ///
    /// # Errors
    /// Returns an error on store failure; callers fail closed.
    pub async fn is_throttled(&self, ip: &str) -> Result<bool> {
        if self.is_whitelisted(ip) {
            return Ok(false);
        }
        self.identifier_locked(&ip_key(ip)).await
    }

    /// True while the email track is locked out.
    ///
    /// # Errors
    /// Returns an error on store failure; callers fail closed.
    pub async fn is_user_throttled(&self, email: &str) -> Result<bool> {
        self.identifier_locked(&email_key(email)).await
    }

    /// Explicitly ban an IP. Independent of attempt counting; used for abuse
    /// response, not normal brute-force defense.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn ban_ip(&self, ip: &str, duration_seconds: i64) -> Result<()> {
        let query = r"
            INSERT INTO ip_bans (ip, banned_until)
            VALUES ($1, NOW() + ($2 * INTERVAL '1 second'))
            ON CONFLICT (ip)
            DO UPDATE SET banned_until = EXCLUDED.banned_until
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(ip)
            .bind(duration_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to ban ip")?;
        info!(ip = %ip, duration_seconds, "ip banned");
        Ok(())
    }

    /// Lift an explicit ban. Idempotent.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn unban_ip(&self, ip: &str) -> Result<bool> {
        let query = "DELETE FROM ip_bans WHERE ip = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(ip)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to unban ip")?;
        Ok(result.rows_affected() > 0)
    }

    /// Unconditional ban check; evaluated before anything else in the
    /// pipeline.
    ///
    /// # Errors
    /// Returns an error on store failure; callers fail closed.
    pub async fn is_ip_banned(&self, ip: &str) -> Result<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM ip_bans
                WHERE ip = $1 AND banned_until > NOW()
            ) AS banned
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(ip)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check ip ban")?;
        Ok(row.get("banned"))
    }

    /// Sliding-window limiter for arbitrary actions.
    ///
    /// Counts events for `action:identifier` in the trailing window. At or
    /// over the limit the call returns `false` without recording the denied
    /// attempt; otherwise the attempt is recorded and the call returns `true`.
    /// The count and the insert run as one statement, so concurrent calls at
    /// the boundary see a single snapshot instead of racing a separate read.
    ///
    /// # Errors
    /// Returns an error on store failure; callers fail closed.
    pub async fn check_rate_limit(
        &self,
        action: &str,
        identifier: &str,
        max_attempts: i64,
        window_seconds: i64,
    ) -> Result<bool> {
        let action_key = format!("{action}:{identifier}");

        let query = r"
            WITH hits AS (
                SELECT COUNT(*) AS n
                FROM rate_limit_events
                WHERE action_key = $1
                  AND created_at > NOW() - ($3 * INTERVAL '1 second')
            )
            INSERT INTO rate_limit_events (action_key)
            SELECT $1 FROM hits WHERE n < $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&action_key)
            .bind(max_attempts)
            .bind(window_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record rate limit event")?;
        Ok(result.rows_affected() > 0)
    }

    /// Purge expired locks, stale unlocked rows, expired bans, and old
    /// rate-limit events. Runs from the background sweeper, never inline.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let query = r"
            DELETE FROM login_attempts
            WHERE (locked_until IS NOT NULL AND locked_until <= NOW())
               OR (locked_until IS NULL AND updated_at <= NOW() - ($1 * INTERVAL '1 second'))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let attempts = sqlx::query(query)
            .bind(STALE_ATTEMPT_SECONDS)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep login attempts")?
            .rows_affected();

        let query = "DELETE FROM ip_bans WHERE banned_until <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let bans = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep ip bans")?
            .rows_affected();

        let query = r"
            DELETE FROM rate_limit_events
            WHERE created_at <= NOW() - ($1 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let rate_limit_events = sqlx::query(query)
            .bind(self.rate_limit_retention_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep rate limit events")?
            .rows_affected();

        Ok(SweepStats {
            attempts,
            bans,
            rate_limit_events,
        })
    }

    async fn record_identifier_failure(&self, identifier: &str) -> Result<()> {
        // Atomic increment-or-insert; read-then-write here would lose counts
        // under concurrent failures against the same identifier.
        let query = r"
            INSERT INTO login_attempts (identifier)
            VALUES ($1)
            ON CONFLICT (identifier)
            DO UPDATE SET attempt_count = login_attempts.attempt_count + 1,
                          updated_at = NOW()
            RETURNING attempt_count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login failure")?;

        let attempt_count: i64 = row.get("attempt_count");
        if attempt_count >= self.max_attempts {
            let lockout = self.lockout_duration_seconds(attempt_count);
            let query = r"
                UPDATE login_attempts
                SET locked_until = NOW() + ($2 * INTERVAL '1 second')
                WHERE identifier = $1
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(identifier)
                .bind(lockout)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to set lockout")?;
            info!(
                identifier = %identifier,
                attempt_count,
                lockout_seconds = lockout,
                "identifier locked out"
            );
        }
        Ok(())
    }

    async fn identifier_locked(&self, identifier: &str) -> Result<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM login_attempts
                WHERE identifier = $1 AND locked_until > NOW()
            ) AS locked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check lockout")?;
        Ok(row.get("locked"))
    }
}

fn ip_key(ip: &str) -> String {
    format!("ip:{ip}")
}

fn email_key(email: &str) -> String {
    format!("email:{}", email.trim().to_lowercase())
}
