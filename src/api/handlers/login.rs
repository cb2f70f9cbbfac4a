//! Credential login and logout.
//!
//! Flow Overview:
//! 1) Check throttle state for the client IP and the claimed email.
//! 2) Verify the password; failures feed both throttle tracks.
//! 3) Issue a session token, a CSRF token, and the session cookie.
//!
//! A missing account and a wrong password produce the same response and
//! roughly the same amount of hashing work.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{error, info, info_span, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::security::{
    error::SecurityError,
    fingerprint::{client_ip, Fingerprint},
    tokens::hash_token,
    Security, SessionContext,
};

use super::{clear_session_cookie_headers, session_cookie_headers};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub user_id: String,
    pub csrf_token: String,
    /// When true, sensitive routes stay locked until `/v1/auth/2fa/verify`
    /// succeeds for this session.
    pub two_factor_required: bool,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated; session cookie set.", body = LoginResponse),
        (status = 401, description = "Invalid credentials."),
        (status = 403, description = "Access temporarily restricted."),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    security: Extension<Arc<Security>>,
    pool: Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    let ip = client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    let email = payload.email.trim().to_ascii_lowercase();

    // Both tracks must be clear before credentials are even looked at.
    let throttled = match throttle_state(&security, &ip, &email).await {
        Ok(throttled) => throttled,
        Err(err) => {
            error!("Throttle lookup failed, denying login: {err}");
            return SecurityError::Throttled.into_response();
        }
    };
    if throttled {
        return SecurityError::Throttled.into_response();
    }

    let account = match fetch_account(&pool, &email).await {
        Ok(account) => account,
        Err(err) => {
            error!("Account lookup failed: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some(account) = account else {
        // Burn comparable hashing work so a missing account is not
        // distinguishable by response time.
        let _ = security.verifier().hash(&payload.password);
        return failed_attempt(&security, &ip, &email).await;
    };

    if !security.verifier().verify(&payload.password, &account.password_hash) {
        return failed_attempt(&security, &ip, &email).await;
    }

    if let Err(err) = security.throttle().record_success(&ip, &email).await {
        error!("Failed to clear throttle state: {err}");
    }

    if security.verifier().needs_rehash(&account.password_hash) {
        rehash_password(&security, &pool, account.user_id, &payload.password).await;
    }

    let fingerprint = Fingerprint::capture(&headers, security.config().bind_session_ip());
    let token = match security
        .sessions()
        .create_session(account.user_id, payload.remember_me, &fingerprint)
        .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let session_hash = hash_token(&token);
    let csrf_token = match security.csrf().rotate_token(&session_hash, None).await {
        Ok(csrf_token) => csrf_token,
        Err(err) => {
            error!("Failed to issue csrf token: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let two_factor_required = match security.two_factor().is_enabled(account.user_id).await {
        Ok(enabled) => enabled,
        Err(err) => {
            error!("2fa enrollment lookup failed, requiring verification: {err}");
            true
        }
    };

    let max_age = security
        .sessions()
        .effective_ttl_seconds(payload.remember_me);
    let cookie = session_cookie_headers(&token, max_age, security.config().cookie_secure());

    info!(user_id = %account.user_id, remember_me = payload.remember_me, "login succeeded");
    (
        StatusCode::OK,
        cookie,
        Json(LoginResponse {
            user_id: account.user_id.to_string(),
            csrf_token,
            two_factor_required,
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session destroyed; cookie cleared."),
        (status = 401, description = "No active session."),
    ),
    tag = "auth"
)]
pub async fn logout(
    security: Extension<Arc<Security>>,
    context: Option<Extension<SessionContext>>,
) -> impl IntoResponse {
    let Some(Extension(context)) = context else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if let Err(err) = security.sessions().destroy_session(&context.raw_token).await {
        error!("Failed to destroy session: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if let Err(err) = security.csrf().clear_session(&context.session_hash).await {
        error!("Failed to clear csrf tokens: {err}");
    }

    let cookie = clear_session_cookie_headers(security.config().cookie_secure());
    (StatusCode::NO_CONTENT, cookie).into_response()
}

struct Account {
    user_id: Uuid,
    password_hash: String,
}

async fn fetch_account(pool: &PgPool, email: &str) -> anyhow::Result<Option<Account>> {
    let query = "SELECT id, password_hash FROM users WHERE email = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.map(|row| Account {
        user_id: row.get("id"),
        password_hash: row.get("password_hash"),
    }))
}

async fn throttle_state(security: &Security, ip: &str, email: &str) -> anyhow::Result<bool> {
    Ok(security.throttle().is_throttled(ip).await?
        || security.throttle().is_user_throttled(email).await?)
}

async fn failed_attempt(security: &Security, ip: &str, email: &str) -> axum::response::Response {
    warn!(ip = %ip, "login failed");
    if let Err(err) = security.throttle().record_failure(ip, email).await {
        error!("Failed to record login failure: {err}");
    }
    SecurityError::InvalidCredentials.into_response()
}

async fn rehash_password(security: &Security, pool: &PgPool, user_id: Uuid, password: &str) {
    // Opportunistic upgrade on successful login; failure only means the old
    // hash stays in place.
    let new_hash = match security.verifier().hash(password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Rehash failed: {err}");
            return;
        }
    };
    let query = "UPDATE users SET password_hash = $2 WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    if let Err(err) = sqlx::query(query)
        .bind(user_id)
        .bind(&new_hash)
        .execute(pool)
        .instrument(span)
        .await
    {
        error!("Failed to persist rehashed password: {err}");
    } else {
        info!(user_id = %user_id, "password hash upgraded to current policy");
    }
}
