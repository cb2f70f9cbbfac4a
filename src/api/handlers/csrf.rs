//! CSRF token issuance for the current session.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::security::{Security, SessionContext};

#[derive(Debug, Serialize, ToSchema)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

#[utoipa::path(
    get,
    path = "/v1/auth/csrf",
    responses(
        (status = 200, description = "Valid CSRF token for this session.", body = CsrfResponse),
        (status = 401, description = "No active session."),
    ),
    tag = "auth"
)]
pub async fn issue(
    security: Extension<Arc<Security>>,
    context: Option<Extension<SessionContext>>,
) -> impl IntoResponse {
    let Some(Extension(context)) = context else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    // Reuses the newest unexpired token so open tabs keep working.
    match security.csrf().get_token(&context.session_hash).await {
        Ok(csrf_token) => Json(CsrfResponse { csrf_token }).into_response(),
        Err(err) => {
            error!("Failed to issue csrf token: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
