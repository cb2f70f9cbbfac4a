//! Route policy: access level, CSRF exemptions, 2FA-sensitive patterns,
//! API classification, and audit-logged prefixes.

use super::config::SecurityConfig;

/// Access required for a route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Permission(String),
}

#[derive(Clone, Debug)]
struct RouteRule {
    prefix: String,
    access: Access,
}

#[derive(Clone, Debug)]
pub struct RoutePolicy {
    rules: Vec<RouteRule>,
    sensitive: Vec<String>,
    csrf_exempt: Vec<String>,
    api_prefixes: Vec<String>,
    audit_prefixes: Vec<String>,
}

impl RoutePolicy {
    #[must_use]
    pub fn from_config(config: &SecurityConfig) -> Self {
        // Longest prefix wins, so /v1/admin/ can be stricter than /v1/.
        let rules = vec![
            rule("/health", Access::Public),
            rule("/login", Access::Public),
            rule("/verify-2fa", Access::Public),
            rule("/v1/auth/login", Access::Public),
            rule("/v1/auth/", Access::Authenticated),
            rule("/v1/admin/", Access::Permission("admin".to_string())),
            rule("/v1/", Access::Authenticated),
            rule("/", Access::Public),
        ];
        Self {
            rules,
            sensitive: config.sensitive_routes().to_vec(),
            csrf_exempt: config.csrf_exempt_routes().to_vec(),
            api_prefixes: config.api_prefixes().to_vec(),
            audit_prefixes: config.audit_prefixes().to_vec(),
        }
    }

    /// Access level for a path; the longest matching prefix rule applies.
    /// Paths matching no rule require authentication (deny-by-default).
    #[must_use]
    pub fn access_for(&self, path: &str) -> Access {
        self.rules
            .iter()
            .filter(|rule| path.starts_with(&rule.prefix))
            .max_by_key(|rule| rule.prefix.len())
            .map_or(Access::Authenticated, |rule| rule.access.clone())
    }

    /// API routes answer with status codes; web routes redirect.
    #[must_use]
    pub fn is_api(&self, path: &str) -> bool {
        self.api_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }

    /// Routes under mandatory 2FA for enrolled users.
    #[must_use]
    pub fn is_sensitive(&self, path: &str) -> bool {
        self.sensitive.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Routes exempt from CSRF validation (webhooks, public read-only API).
    #[must_use]
    pub fn is_csrf_exempt(&self, path: &str) -> bool {
        self.csrf_exempt
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }

    /// Routes whose access is security-event logged regardless of outcome.
    #[must_use]
    pub fn is_audited(&self, path: &str) -> bool {
        self.audit_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }
}

fn rule(prefix: &str, access: Access) -> RouteRule {
    RouteRule {
        prefix: prefix.to_string(),
        access,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn policy() -> RoutePolicy {
        let config = SecurityConfig::new(
            "https://stories.example".to_string(),
            SecretString::from("key"),
        );
        RoutePolicy::from_config(&config)
    }

    #[test]
    fn longest_prefix_wins() {
        let policy = policy();
        assert_eq!(policy.access_for("/v1/auth/login"), Access::Public);
        assert_eq!(policy.access_for("/v1/auth/session"), Access::Authenticated);
        assert_eq!(
            policy.access_for("/v1/admin/bans"),
            Access::Permission("admin".to_string())
        );
        assert_eq!(policy.access_for("/v1/stories"), Access::Authenticated);
        assert_eq!(policy.access_for("/health"), Access::Public);
        assert_eq!(policy.access_for("/about"), Access::Public);
    }

    #[test]
    fn api_classification_follows_prefixes() {
        let policy = policy();
        assert!(policy.is_api("/v1/auth/login"));
        assert!(!policy.is_api("/login"));
        assert!(!policy.is_api("/settings/security"));
    }

    #[test]
    fn sensitive_routes_from_config() {
        let policy = policy();
        assert!(policy.is_sensitive("/v1/admin/bans"));
        assert!(policy.is_sensitive("/settings/security"));
        assert!(!policy.is_sensitive("/v1/stories"));
    }

    #[test]
    fn webhooks_are_csrf_exempt() {
        let policy = policy();
        assert!(policy.is_csrf_exempt("/webhooks/payments"));
        assert!(!policy.is_csrf_exempt("/v1/stories"));
    }

    #[test]
    fn auth_and_admin_routes_are_audited() {
        let policy = policy();
        assert!(policy.is_audited("/v1/auth/login"));
        assert!(policy.is_audited("/v1/admin/bans"));
        assert!(!policy.is_audited("/v1/stories"));
    }
}
