//! HTTP handlers.
//!
//! The gateway middleware resolves identity before any handler runs and
//! stores [`Identity`] and [`SessionContext`] in the request extensions;
//! handlers read them from there instead of re-checking cookies.

use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use tracing::error;

use crate::security::gateway::SESSION_COOKIE_NAME;

pub mod bans;
pub mod csrf;
pub mod health;
pub mod login;
pub mod session;
pub mod two_factor;

/// Set-Cookie headers for issuing a session token.
pub(crate) fn session_cookie_headers(token: &str, max_age_seconds: i64, secure: bool) -> HeaderMap {
    cookie_headers(token, max_age_seconds, secure)
}

/// Set-Cookie headers that clear the session cookie (logout).
pub(crate) fn clear_session_cookie_headers(secure: bool) -> HeaderMap {
    cookie_headers("", 0, secure)
}

fn cookie_headers(value: &str, max_age_seconds: i64, secure: bool) -> HeaderMap {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }

    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(&cookie) {
        Ok(header) => {
            headers.insert(SET_COOKIE, header);
        }
        Err(err) => {
            error!("Failed to build session cookie header: {err}");
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_cookie_is_scoped_and_http_only() {
        let headers = session_cookie_headers("tok", 3600, true);
        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("gatehouse_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn insecure_origin_drops_secure_attribute() {
        let headers = session_cookie_headers("tok", 60, false);
        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn clearing_sets_zero_max_age() {
        let headers = clear_session_cookie_headers(false);
        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("gatehouse_session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
