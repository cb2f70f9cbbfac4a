//! The ordered request-gating pipeline.
//!
//! Every inbound request passes through [`gate`] before its handler runs:
//! ban check, identity resolution, permission check, CSRF, 2FA, rate
//! limiting, audit logging, then security response headers on the way out.
//! Each step short-circuits; ban and throttle lookups that fail are treated
//! as denials (fail closed).

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE, CONTENT_TYPE, LOCATION},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use super::csrf::presented_token;
use super::error::SecurityError;
use super::fingerprint::{client_ip, Fingerprint};
use super::identity::{Identity, SessionContext};
use super::policy::Access;
use super::tokens::hash_token;
use super::Security;

/// Cookie holding the opaque session token.
pub const SESSION_COOKIE_NAME: &str = "gatehouse_session";

/// Action the generic rate limiter keys API traffic under.
const API_RATE_LIMIT_ACTION: &str = "api_request";

// Forms larger than this skip body extraction; the header/query transports
// still apply.
const MAX_FORM_BYTES: usize = 256 * 1024;

/// Pipeline middleware. Ordering is part of the contract: a banned IP must
/// never reach credential or session checks, and a locked-out caller must
/// never learn anything from timing.
pub async fn gate(State(security): State<Arc<Security>>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers = req.headers().clone();
    let ip = client_ip(&headers);
    let is_api = security.policy().is_api(&path);

    // 1. IP ban check: cheapest, evaluated first, unconditional.
    if let Some(ip) = ip.as_deref() {
        match security.throttle().is_ip_banned(ip).await {
            Ok(false) => {}
            Ok(true) => {
                audit_denial(&security, &path, &method, &headers, ip, "banned");
                return SecurityError::Banned.into_response();
            }
            Err(err) => {
                error!("ban check failed, denying: {err}");
                return SecurityError::Banned.into_response();
            }
        }
    }

    // 2. Resolve identity. Absence is anonymous, not an error.
    let fingerprint = Fingerprint::capture(&headers, security.config().bind_session_ip());
    let (identity, session) =
        match resolve_identity(&security, &headers, &fingerprint, is_api).await {
            Ok(resolved) => resolved,
            Err(err) => {
                error!("identity resolution failed: {err}");
                return SecurityError::SessionInvalidOrExpired.into_response();
            }
        };

    // 3. Permission check.
    match security.policy().access_for(&path) {
        Access::Public => {}
        Access::Authenticated => {
            if identity.is_anonymous() {
                return deny_unauthenticated(is_api, &path);
            }
        }
        Access::Permission(ref permission) => {
            if identity.is_anonymous() {
                return deny_unauthenticated(is_api, &path);
            }
            if !identity.has_role(permission) {
                return StatusCode::FORBIDDEN.into_response();
            }
        }
    }

    // 4. CSRF: state-changing, non-API, non-exempt routes only.
    let mut req = req;
    if csrf_applies(&method, is_api, security.policy().is_csrf_exempt(&path)) {
        let Some(ref ctx) = session else {
            return SecurityError::CsrfInvalid.into_response();
        };
        let (checked_req, valid) =
            match validate_csrf(&security, req, ctx, &headers, query.as_deref()).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!("csrf validation failed: {err}");
                    return SecurityError::CsrfInvalid.into_response();
                }
            };
        req = checked_req;
        if !valid {
            warn!(path = %path, "csrf token missing or invalid");
            return SecurityError::CsrfInvalid.into_response();
        }
    }

    // 5. 2FA: sensitive routes, enrolled users, once per session.
    if let Some(user_id) = identity.user_id() {
        let verified = session.as_ref().is_some_and(|ctx| ctx.two_factor_verified);
        if security.policy().is_sensitive(&path) && !verified {
            match security.two_factor().is_enabled(user_id).await {
                Ok(false) => {}
                Ok(true) => return deny_two_factor(is_api, &path),
                Err(err) => {
                    error!("2fa enrollment check failed, denying: {err}");
                    return deny_two_factor(is_api, &path);
                }
            }
        }
    }

    // 6. Rate limiting: API routes, keyed by user id else IP.
    if is_api {
        let key = identity
            .user_id()
            .map(|user_id| format!("user:{user_id}"))
            .or_else(|| ip.as_ref().map(|ip| format!("ip:{ip}")))
            .unwrap_or_else(|| "anonymous".to_string());
        let allowed = security
            .throttle()
            .check_rate_limit(
                API_RATE_LIMIT_ACTION,
                &key,
                security.config().api_rate_limit_max(),
                security.config().api_rate_limit_window_seconds(),
            )
            .await;
        match allowed {
            Ok(true) => {}
            Ok(false) => return SecurityError::RateLimitExceeded.into_response(),
            Err(err) => {
                error!("rate limit check failed, denying: {err}");
                return SecurityError::RateLimitExceeded.into_response();
            }
        }
    }

    // 7. Security event logging for sensitive prefixes, regardless of the
    // handler's outcome.
    if security.policy().is_audited(&path) {
        info!(
            target: "security_audit",
            route = %path,
            method = %method,
            user_id = identity.user_id().map(|id| id.to_string()).unwrap_or_default(),
            ip = ip.as_deref().unwrap_or(""),
            user_agent = %fingerprint.user_agent,
            "sensitive route accessed"
        );
    }

    // Hand resolved context to the handler.
    req.extensions_mut().insert(identity);
    if let Some(ctx) = session {
        req.extensions_mut().insert(ctx);
    }

    // 8. Delegate, then add security headers the handler did not set itself.
    let mut response = next.run(req).await;
    apply_security_headers(response.headers_mut(), &security);
    response
}

async fn resolve_identity(
    security: &Security,
    headers: &HeaderMap,
    fingerprint: &Fingerprint,
    is_api: bool,
) -> anyhow::Result<(Identity, Option<SessionContext>)> {
    let Some(raw_token) = extract_session_token(headers, is_api) else {
        return Ok((Identity::Anonymous, None));
    };

    let Some(record) = security
        .sessions()
        .validate_session(&raw_token, fingerprint)
        .await?
    else {
        return Ok((Identity::Anonymous, None));
    };

    let context = SessionContext {
        session_hash: hash_token(&raw_token),
        raw_token,
        remember_me: record.remember_me,
        two_factor_verified: record.two_factor_verified,
        expires_at: record.expires_at,
    };
    Ok((
        Identity::Authenticated {
            user_id: record.user_id,
            roles: record.roles,
        },
        Some(context),
    ))
}

/// Pull the session token from the cookie, or from a bearer header on API
/// routes.
#[must_use]
pub fn extract_session_token(headers: &HeaderMap, allow_bearer: bool) -> Option<String> {
    if allow_bearer {
        if let Some(token) = extract_bearer_token(headers) {
            return Some(token);
        }
    }
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// CSRF applies to state-changing, non-API, non-exempt requests.
#[must_use]
pub fn csrf_applies(method: &Method, is_api: bool, exempt: bool) -> bool {
    let safe = matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS);
    !safe && !is_api && !exempt
}

async fn validate_csrf(
    security: &Security,
    req: Request,
    ctx: &SessionContext,
    headers: &HeaderMap,
    query: Option<&str>,
) -> anyhow::Result<(Request, bool)> {
    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

    // Form bodies must be buffered to read the csrf_token field, then handed
    // back to the handler untouched.
    let (req, form_body) = if is_form {
        let (parts, body) = req.into_parts();
        let bytes = to_bytes(body, MAX_FORM_BYTES).await?;
        let restored = Request::from_parts(parts, Body::from(bytes.clone()));
        (restored, Some(bytes))
    } else {
        (req, None)
    };

    let token = presented_token(headers, query, form_body.as_deref());
    let Some(token) = token else {
        return Ok((req, false));
    };
    let valid = security
        .csrf()
        .validate_token(&ctx.session_hash, &token)
        .await?;
    Ok((req, valid))
}

fn deny_unauthenticated(is_api: bool, path: &str) -> Response {
    if is_api {
        StatusCode::UNAUTHORIZED.into_response()
    } else {
        redirect_found(&format!("/login?return_to={path}"))
    }
}

fn deny_two_factor(is_api: bool, path: &str) -> Response {
    if is_api {
        SecurityError::TwoFactorRequired.into_response()
    } else {
        redirect_found(&format!("/verify-2fa?return_to={path}"))
    }
}

/// Plain 302 with a Location header; the web contract predates 303/307
/// semantics and clients depend on it.
fn redirect_found(location: &str) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}

fn audit_denial(
    security: &Security,
    path: &str,
    method: &Method,
    headers: &HeaderMap,
    ip: &str,
    reason: &str,
) {
    if security.policy().is_audited(path) {
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        info!(
            target: "security_audit",
            route = %path,
            method = %method,
            ip = %ip,
            user_agent = %user_agent,
            reason = %reason,
            "request denied"
        );
    }
}

fn apply_security_headers(headers: &mut HeaderMap, security: &Security) {
    const STATIC_HEADERS: [(&str, &str); 3] = [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("x-xss-protection", "1; mode=block"),
    ];
    for (name, value) in STATIC_HEADERS {
        insert_if_absent(headers, name, value);
    }
    insert_if_absent(
        headers,
        "referrer-policy",
        "strict-origin-when-cross-origin",
    );
    let csp = security.config().content_security_policy().to_string();
    insert_if_absent(headers, "content-security-policy", &csp);
    if security.config().cookie_secure() {
        let hsts = security.config().strict_transport_security().to_string();
        insert_if_absent(headers, "strict-transport-security", &hsts);
    }
}

fn insert_if_absent(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if !headers.contains_key(name) {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn csrf_skips_safe_methods() {
        assert!(!csrf_applies(&Method::GET, false, false));
        assert!(!csrf_applies(&Method::HEAD, false, false));
        assert!(!csrf_applies(&Method::OPTIONS, false, false));
        assert!(csrf_applies(&Method::POST, false, false));
        assert!(csrf_applies(&Method::DELETE, false, false));
    }

    #[test]
    fn csrf_skips_api_and_exempt_routes() {
        assert!(!csrf_applies(&Method::POST, true, false));
        assert!(!csrf_applies(&Method::POST, false, true));
    }

    #[test]
    fn session_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; gatehouse_session=tok123; lang=en"),
        );
        assert_eq!(
            extract_session_token(&headers, false).as_deref(),
            Some("tok123")
        );
    }

    #[test]
    fn bearer_only_on_api_routes() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok456"));
        assert_eq!(
            extract_session_token(&headers, true).as_deref(),
            Some("tok456")
        );
        assert_eq!(extract_session_token(&headers, false), None);
    }

    #[test]
    fn empty_cookie_value_is_none() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("gatehouse_session="));
        assert_eq!(extract_session_token(&headers, false), None);
    }

    #[test]
    fn redirect_found_is_302_with_location() {
        let response = redirect_found("/login?return_to=/settings");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION),
            Some(&HeaderValue::from_static("/login?return_to=/settings"))
        );
    }

    #[tokio::test]
    async fn form_body_survives_csrf_extraction() {
        use crate::security::SecurityConfig;
        use base64::Engine;

        let key = base64::engine::general_purpose::STANDARD.encode([3u8; 32]);
        let config = SecurityConfig::new(
            "https://stories.example".to_string(),
            secrecy::SecretString::from(key),
        );
        // Lazy pools never connect until used; the missing-token path below
        // returns before any query.
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unused")
            .expect("valid test dsn");
        let security = Security::new(pool, config).expect("security should assemble");

        let ctx = SessionContext {
            session_hash: vec![0u8; 32],
            raw_token: "tok".to_string(),
            remember_me: false,
            two_factor_verified: false,
            expires_at: chrono::Utc::now(),
        };
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/settings/profile")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("title=hello&body=world"))
            .expect("valid request");
        let headers = req.headers().clone();

        let (restored, valid) = validate_csrf(&security, req, &ctx, &headers, None)
            .await
            .expect("no store access on missing token");
        assert!(!valid);

        let bytes = to_bytes(restored.into_body(), MAX_FORM_BYTES)
            .await
            .expect("body should be restored");
        assert_eq!(&bytes[..], b"title=hello&body=world");
    }

    #[test]
    fn insert_if_absent_respects_handler_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
        insert_if_absent(&mut headers, "x-frame-options", "DENY");
        insert_if_absent(&mut headers, "x-content-type-options", "nosniff");
        assert_eq!(
            headers.get("x-frame-options"),
            Some(&HeaderValue::from_static("SAMEORIGIN"))
        );
        assert_eq!(
            headers.get("x-content-type-options"),
            Some(&HeaderValue::from_static("nosniff"))
        );
    }
}
