//! Security-related CLI arguments: public URL, encryption key, session and
//! throttle tuning.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use secrecy::SecretString;

pub const ARG_PUBLIC_URL: &str = "public-url";
pub const ARG_ENCRYPTION_KEY: &str = "encryption-key";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_REMEMBER_ME_TTL: &str = "remember-me-ttl-seconds";
pub const ARG_NO_BIND_SESSION_IP: &str = "no-bind-session-ip";
pub const ARG_MAX_ATTEMPTS: &str = "max-login-attempts";
pub const ARG_LOCKOUT_SECONDS: &str = "lockout-seconds";
pub const ARG_CSRF_TTL: &str = "csrf-ttl-seconds";
pub const ARG_RATE_LIMIT_MAX: &str = "api-rate-limit-max";
pub const ARG_RATE_LIMIT_WINDOW: &str = "api-rate-limit-window-seconds";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_WHITELISTED_IPS: &str = "whitelisted-ips";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUBLIC_URL)
                .long(ARG_PUBLIC_URL)
                .help("Public base URL; drives CORS and the Secure cookie attribute")
                .env("GATEHOUSE_PUBLIC_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ENCRYPTION_KEY)
                .long(ARG_ENCRYPTION_KEY)
                .help("Base64-encoded 32-byte key for 2FA secrets at rest")
                .env("GATEHOUSE_ENCRYPTION_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Session lifetime in seconds")
                .env("GATEHOUSE_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REMEMBER_ME_TTL)
                .long(ARG_REMEMBER_ME_TTL)
                .help("Remember-me session lifetime in seconds")
                .env("GATEHOUSE_REMEMBER_ME_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_NO_BIND_SESSION_IP)
                .long(ARG_NO_BIND_SESSION_IP)
                .help("Do not bind sessions to the client IP (mobile-heavy deployments)")
                .env("GATEHOUSE_NO_BIND_SESSION_IP")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_MAX_ATTEMPTS)
                .long(ARG_MAX_ATTEMPTS)
                .help("Failed login attempts before lockout")
                .env("GATEHOUSE_MAX_LOGIN_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SECONDS)
                .long(ARG_LOCKOUT_SECONDS)
                .help("Base lockout duration in seconds; grows with repeated failures")
                .env("GATEHOUSE_LOCKOUT_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_CSRF_TTL)
                .long(ARG_CSRF_TTL)
                .help("CSRF token lifetime in seconds")
                .env("GATEHOUSE_CSRF_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_MAX)
                .long(ARG_RATE_LIMIT_MAX)
                .help("API requests allowed per window")
                .env("GATEHOUSE_API_RATE_LIMIT_MAX")
                .default_value("100")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW)
                .long(ARG_RATE_LIMIT_WINDOW)
                .help("API rate limit window in seconds")
                .env("GATEHOUSE_API_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer name shown in authenticator apps")
                .env("GATEHOUSE_TOTP_ISSUER")
                .default_value("gatehouse"),
        )
        .arg(
            Arg::new(ARG_WHITELISTED_IPS)
                .long(ARG_WHITELISTED_IPS)
                .help("Comma-separated IPs exempt from login throttling")
                .env("GATEHOUSE_WHITELISTED_IPS"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub public_base_url: String,
    pub encryption_key: SecretString,
    pub session_ttl_seconds: i64,
    pub remember_me_ttl_seconds: i64,
    pub bind_session_ip: bool,
    pub max_attempts: i64,
    pub lockout_seconds: i64,
    pub csrf_ttl_seconds: i64,
    pub rate_limit_max: i64,
    pub rate_limit_window_seconds: i64,
    pub totp_issuer: String,
    pub whitelisted_ips: Vec<String>,
}

impl Options {
    /// Extract security options from parsed CLI matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let public_base_url = matches
            .get_one::<String>(ARG_PUBLIC_URL)
            .cloned()
            .context("missing required argument: --public-url")?;
        let encryption_key = matches
            .get_one::<String>(ARG_ENCRYPTION_KEY)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --encryption-key")?;

        let whitelisted_ips = matches
            .get_one::<String>(ARG_WHITELISTED_IPS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            public_base_url,
            encryption_key,
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL)
                .copied()
                .unwrap_or(43200),
            remember_me_ttl_seconds: matches
                .get_one::<i64>(ARG_REMEMBER_ME_TTL)
                .copied()
                .unwrap_or(2_592_000),
            bind_session_ip: !matches.get_flag(ARG_NO_BIND_SESSION_IP),
            max_attempts: matches.get_one::<i64>(ARG_MAX_ATTEMPTS).copied().unwrap_or(5),
            lockout_seconds: matches
                .get_one::<i64>(ARG_LOCKOUT_SECONDS)
                .copied()
                .unwrap_or(900),
            csrf_ttl_seconds: matches.get_one::<i64>(ARG_CSRF_TTL).copied().unwrap_or(3600),
            rate_limit_max: matches
                .get_one::<i64>(ARG_RATE_LIMIT_MAX)
                .copied()
                .unwrap_or(100),
            rate_limit_window_seconds: matches
                .get_one::<i64>(ARG_RATE_LIMIT_WINDOW)
                .copied()
                .unwrap_or(3600),
            totp_issuer: matches
                .get_one::<String>(ARG_TOTP_ISSUER)
                .cloned()
                .unwrap_or_else(|| "gatehouse".to_string()),
            whitelisted_ips,
        })
    }
}
