//! Background cleanup of expired security state.
//!
//! One periodic task deletes expired sessions, stale login-attempt and ban
//! rows, old rate-limit events, and expired CSRF tokens. Failures are logged
//! and retried on the next tick; the task never aborts the process.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::Security;

const DEFAULT_INTERVAL_SECONDS: u64 = 300;

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECONDS),
        }
    }
}

impl SweeperConfig {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Spawn the detached cleanup loop; it runs until the process exits.
pub fn spawn(security: Arc<Security>, config: SweeperConfig) {
    tokio::spawn(async move {
        info!(
            interval_seconds = config.interval.as_secs(),
            "security sweeper started"
        );
        loop {
            tokio::time::sleep(config.interval).await;
            run_once(&security).await;
        }
    });
}

async fn run_once(security: &Security) {
    match security.sessions().cleanup_expired().await {
        Ok(sessions) if sessions > 0 => info!(sessions, "expired sessions removed"),
        Ok(_) => {}
        Err(err) => error!("session cleanup failed: {err}"),
    }

    match security.throttle().sweep().await {
        Ok(stats) if stats.attempts > 0 || stats.bans > 0 || stats.rate_limit_events > 0 => {
            info!(
                attempts = stats.attempts,
                bans = stats.bans,
                rate_limit_events = stats.rate_limit_events,
                "throttle state swept"
            );
        }
        Ok(_) => {}
        Err(err) => error!("throttle sweep failed: {err}"),
    }

    match security.csrf().cleanup_expired().await {
        Ok(tokens) if tokens > 0 => info!(tokens, "expired csrf tokens removed"),
        Ok(_) => {}
        Err(err) => error!("csrf cleanup failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_is_five_minutes() {
        let config = SweeperConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
    }

    #[test]
    fn interval_override_applies() {
        let config = SweeperConfig::default().with_interval(Duration::from_secs(30));
        assert_eq!(config.interval, Duration::from_secs(30));
    }
}
