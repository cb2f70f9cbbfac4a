//! Session introspection and sliding-window extension.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::security::{Identity, Security, SessionContext};

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub user_id: String,
    pub roles: Vec<String>,
    pub remember_me: bool,
    pub two_factor_verified: bool,
    /// RFC 3339 expiry timestamp.
    pub expires_at: String,
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Current session details.", body = SessionResponse),
        (status = 401, description = "No active session."),
    ),
    tag = "auth"
)]
pub async fn introspect(
    identity: Option<Extension<Identity>>,
    context: Option<Extension<SessionContext>>,
) -> impl IntoResponse {
    let (Some(Extension(identity)), Some(Extension(context))) = (identity, context) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Identity::Authenticated { user_id, roles } = identity else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    Json(SessionResponse {
        user_id: user_id.to_string(),
        roles,
        remember_me: context.remember_me,
        two_factor_verified: context.two_factor_verified,
        expires_at: context.expires_at.to_rfc3339(),
    })
    .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/extend",
    responses(
        (status = 204, description = "Expiry pushed out by the remember-me TTL."),
        (status = 400, description = "Session is not a remember-me session."),
        (status = 401, description = "No active session."),
    ),
    tag = "auth"
)]
pub async fn extend(
    security: Extension<Arc<Security>>,
    context: Option<Extension<SessionContext>>,
) -> impl IntoResponse {
    let Some(Extension(context)) = context else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    // Only remember-me sessions slide; short sessions keep a fixed expiry.
    match security.sessions().extend_session(&context.raw_token).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::BAD_REQUEST.into_response(),
        Err(err) => {
            error!("Failed to extend session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
