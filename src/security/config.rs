//! Security configuration with builder-style overrides.

use secrecy::SecretString;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_REMEMBER_ME_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;
const DEFAULT_CSRF_TTL_SECONDS: i64 = 3600;
const DEFAULT_API_RATE_LIMIT_MAX: i64 = 100;
const DEFAULT_API_RATE_LIMIT_WINDOW_SECONDS: i64 = 3600;
const DEFAULT_CSP: &str = "default-src 'self'";
const DEFAULT_HSTS: &str = "max-age=31536000; includeSubDomains";

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    public_base_url: String,
    encryption_key: SecretString,
    session_ttl_seconds: i64,
    remember_me_ttl_seconds: i64,
    bind_session_ip: bool,
    max_attempts: i64,
    lockout_seconds: i64,
    csrf_ttl_seconds: i64,
    api_rate_limit_max: i64,
    api_rate_limit_window_seconds: i64,
    totp_issuer: String,
    whitelisted_ips: Vec<String>,
    sensitive_routes: Vec<String>,
    csrf_exempt_routes: Vec<String>,
    api_prefixes: Vec<String>,
    audit_prefixes: Vec<String>,
    content_security_policy: String,
    strict_transport_security: String,
}

impl SecurityConfig {
    #[must_use]
    pub fn new(public_base_url: String, encryption_key: SecretString) -> Self {
        Self {
            public_base_url,
            encryption_key,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_me_ttl_seconds: DEFAULT_REMEMBER_ME_TTL_SECONDS,
            bind_session_ip: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
            csrf_ttl_seconds: DEFAULT_CSRF_TTL_SECONDS,
            api_rate_limit_max: DEFAULT_API_RATE_LIMIT_MAX,
            api_rate_limit_window_seconds: DEFAULT_API_RATE_LIMIT_WINDOW_SECONDS,
            totp_issuer: "gatehouse".to_string(),
            whitelisted_ips: Vec::new(),
            sensitive_routes: vec!["/v1/admin/".to_string(), "/settings/security".to_string()],
            csrf_exempt_routes: vec!["/webhooks/".to_string()],
            api_prefixes: vec!["/v1/".to_string()],
            audit_prefixes: vec!["/v1/auth/".to_string(), "/v1/admin/".to_string()],
            content_security_policy: DEFAULT_CSP.to_string(),
            strict_transport_security: DEFAULT_HSTS.to_string(),
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_me_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_me_ttl_seconds = seconds;
        self
    }

    /// Disable IP binding for mobile-heavy deployments where client IPs churn.
    #[must_use]
    pub fn with_bind_session_ip(mut self, bind: bool) -> Self {
        self.bind_session_ip = bind;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max: i64) -> Self {
        self.max_attempts = max;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_csrf_ttl_seconds(mut self, seconds: i64) -> Self {
        self.csrf_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_api_rate_limit(mut self, max: i64, window_seconds: i64) -> Self {
        self.api_rate_limit_max = max;
        self.api_rate_limit_window_seconds = window_seconds;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_whitelisted_ips(mut self, ips: Vec<String>) -> Self {
        self.whitelisted_ips = ips;
        self
    }

    #[must_use]
    pub fn with_sensitive_routes(mut self, routes: Vec<String>) -> Self {
        self.sensitive_routes = routes;
        self
    }

    #[must_use]
    pub fn with_csrf_exempt_routes(mut self, routes: Vec<String>) -> Self {
        self.csrf_exempt_routes = routes;
        self
    }

    #[must_use]
    pub fn with_content_security_policy(mut self, csp: String) -> Self {
        self.content_security_policy = csp;
        self
    }

    #[must_use]
    pub fn with_strict_transport_security(mut self, hsts: String) -> Self {
        self.strict_transport_security = hsts;
        self
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub(crate) fn encryption_key(&self) -> &SecretString {
        &self.encryption_key
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn remember_me_ttl_seconds(&self) -> i64 {
        self.remember_me_ttl_seconds
    }

    #[must_use]
    pub fn bind_session_ip(&self) -> bool {
        self.bind_session_ip
    }

    #[must_use]
    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    #[must_use]
    pub fn lockout_seconds(&self) -> i64 {
        self.lockout_seconds
    }

    #[must_use]
    pub fn csrf_ttl_seconds(&self) -> i64 {
        self.csrf_ttl_seconds
    }

    #[must_use]
    pub fn api_rate_limit_max(&self) -> i64 {
        self.api_rate_limit_max
    }

    #[must_use]
    pub fn api_rate_limit_window_seconds(&self) -> i64 {
        self.api_rate_limit_window_seconds
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub fn whitelisted_ips(&self) -> &[String] {
        &self.whitelisted_ips
    }

    #[must_use]
    pub fn sensitive_routes(&self) -> &[String] {
        &self.sensitive_routes
    }

    #[must_use]
    pub fn csrf_exempt_routes(&self) -> &[String] {
        &self.csrf_exempt_routes
    }

    #[must_use]
    pub fn api_prefixes(&self) -> &[String] {
        &self.api_prefixes
    }

    #[must_use]
    pub fn audit_prefixes(&self) -> &[String] {
        &self.audit_prefixes
    }

    #[must_use]
    pub fn content_security_policy(&self) -> &str {
        &self.content_security_policy
    }

    #[must_use]
    pub fn strict_transport_security(&self) -> &str {
        &self.strict_transport_security
    }

    /// Only mark cookies secure when the public surface is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.public_base_url.starts_with("https://")
    }
}
