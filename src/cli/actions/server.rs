use crate::{api, cli::commands::security::Options, security::SecurityConfig};
use anyhow::Result;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub security: Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let options = args.security;

    let config = SecurityConfig::new(options.public_base_url, options.encryption_key)
        .with_session_ttl_seconds(options.session_ttl_seconds)
        .with_remember_me_ttl_seconds(options.remember_me_ttl_seconds)
        .with_bind_session_ip(options.bind_session_ip)
        .with_max_attempts(options.max_attempts)
        .with_lockout_seconds(options.lockout_seconds)
        .with_csrf_ttl_seconds(options.csrf_ttl_seconds)
        .with_api_rate_limit(options.rate_limit_max, options.rate_limit_window_seconds)
        .with_totp_issuer(options.totp_issuer)
        .with_whitelisted_ips(options.whitelisted_ips);

    api::new(args.port, args.dsn, config).await
}
