//! Client fingerprint capture and reduced user-agent comparison.
//!
//! Sessions are bound to the exact client IP (configurable) and a *reduced*
//! user-agent signature: browser family plus major version. Minor patch drift
//! from extensions or auto-updates does not invalidate a session; a different
//! browser or major version does.

use axum::http::{header::USER_AGENT, HeaderMap};

/// Reduced client signature recorded at session creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub ip: Option<String>,
    pub user_agent: String,
}

impl Fingerprint {
    /// Capture the fingerprint for an inbound request.
    ///
    /// When IP binding is disabled the IP is dropped here, so it is neither
    /// stored nor compared later.
    #[must_use]
    pub fn capture(headers: &HeaderMap, bind_ip: bool) -> Self {
        let ip = if bind_ip { client_ip(headers) } else { None };
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(reduce_user_agent)
            .unwrap_or_default();
        Self { ip, user_agent }
    }

    /// Compare against the values recorded at session creation.
    ///
    /// An IP recorded as NULL (binding disabled at creation) never causes a
    /// mismatch, regardless of the current setting. A session that *was*
    /// bound to an IP requires a resolvable client IP on every later
    /// request; a request with no derivable IP does not inherit the binding.
    #[must_use]
    pub fn matches(&self, stored_ip: Option<&str>, stored_user_agent: &str) -> bool {
        match (stored_ip, self.ip.as_deref()) {
            (Some(stored), Some(current)) if stored != current => return false,
            (Some(_), None) => return false,
            _ => {}
        }
        self.user_agent == stored_user_agent
    }
}

/// Extract a client IP from common proxy headers.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Reduce a raw user-agent string to `family/major`.
///
/// Detection order matters: Edge and Opera both embed `Chrome/`, and Chrome
/// embeds `Safari/`, so the more specific markers are checked first.
#[must_use]
pub fn reduce_user_agent(user_agent: &str) -> String {
    const FAMILIES: [(&str, &str); 6] = [
        ("Edg/", "Edge"),
        ("OPR/", "Opera"),
        ("Chrome/", "Chrome"),
        ("Firefox/", "Firefox"),
        ("Version/", "Safari"),
        ("Trident/", "IE"),
    ];

    for (marker, family) in FAMILIES {
        if let Some(rest) = user_agent.split(marker).nth(1) {
            // Safari reports its version behind "Version/" but only when the
            // UA also carries the Safari token.
            if family == "Safari" && !user_agent.contains("Safari/") {
                continue;
            }
            let major: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if major.is_empty() {
                return family.to_string();
            }
            return format!("{family}/{major}");
        }
    }

    "Other".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const CHROME_120: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.6099.71 Safari/537.36";
    const CHROME_120_PATCH: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.6099.225 Safari/537.36";
    const FIREFOX_121: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const SAFARI_17: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
         AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15";
    const EDGE_120: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";

    #[test]
    fn reduce_detects_families() {
        assert_eq!(reduce_user_agent(CHROME_120), "Chrome/120");
        assert_eq!(reduce_user_agent(FIREFOX_121), "Firefox/121");
        assert_eq!(reduce_user_agent(SAFARI_17), "Safari/17");
        assert_eq!(reduce_user_agent(EDGE_120), "Edge/120");
        assert_eq!(reduce_user_agent("curl/8.4.0"), "Other");
    }

    #[test]
    fn minor_patch_drift_keeps_fingerprint() {
        assert_eq!(
            reduce_user_agent(CHROME_120),
            reduce_user_agent(CHROME_120_PATCH)
        );
    }

    #[test]
    fn different_browser_changes_fingerprint() {
        assert_ne!(reduce_user_agent(CHROME_120), reduce_user_agent(FIREFOX_121));
    }

    #[test]
    fn capture_honors_bind_ip_toggle() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.4.0"));

        let bound = Fingerprint::capture(&headers, true);
        assert_eq!(bound.ip.as_deref(), Some("203.0.113.9"));

        let unbound = Fingerprint::capture(&headers, false);
        assert_eq!(unbound.ip, None);
    }

    #[test]
    fn matches_rejects_ip_change() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        headers.insert(USER_AGENT, HeaderValue::from_static(CHROME_120));
        let current = Fingerprint::capture(&headers, true);

        assert!(current.matches(Some("198.51.100.7"), "Chrome/120"));
        assert!(!current.matches(Some("198.51.100.8"), "Chrome/120"));
    }

    #[test]
    fn matches_rejects_missing_current_ip() {
        // A bound session presented over a path with no proxy headers must
        // not skip the IP comparison.
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CHROME_120));
        let current = Fingerprint::capture(&headers, true);
        assert_eq!(current.ip, None);
        assert!(!current.matches(Some("198.51.100.7"), "Chrome/120"));
    }

    #[test]
    fn matches_tolerates_unbound_stored_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        headers.insert(USER_AGENT, HeaderValue::from_static(CHROME_120));
        let current = Fingerprint::capture(&headers, true);
        assert!(current.matches(None, "Chrome/120"));
    }

    #[test]
    fn matches_rejects_browser_change() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(FIREFOX_121));
        let current = Fingerprint::capture(&headers, true);
        assert!(!current.matches(None, "Chrome/120"));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn client_ip_none_when_missing() {
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
