//! 2FA enrollment and per-session verification.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;

use crate::security::{error::SecurityError, Identity, Security, SessionContext};

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrollmentResponse {
    /// Base32 secret for the authenticator app. Shown exactly once.
    pub secret_base32: String,
    /// Single-use recovery codes. Shown exactly once.
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct VerifyRequest {
    pub code: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/enable",
    responses(
        (status = 200, description = "Enrollment material; displayed once.", body = EnrollmentResponse),
        (status = 401, description = "No active session."),
    ),
    tag = "auth"
)]
pub async fn enable(
    security: Extension<Arc<Security>>,
    identity: Option<Extension<Identity>>,
) -> impl IntoResponse {
    let Some(user_id) = identity.and_then(|Extension(identity)| identity.user_id()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match security.two_factor().enable(user_id).await {
        Ok(enrollment) => Json(EnrollmentResponse {
            secret_base32: enrollment.secret_base32,
            backup_codes: enrollment.backup_codes,
        })
        .into_response(),
        Err(err) => {
            error!("Failed to enable 2fa: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/verify",
    request_body = VerifyRequest,
    responses(
        (status = 204, description = "Code accepted; session marked verified."),
        (status = 401, description = "No active session or wrong code."),
    ),
    tag = "auth"
)]
pub async fn verify(
    security: Extension<Arc<Security>>,
    identity: Option<Extension<Identity>>,
    context: Option<Extension<SessionContext>>,
    Json(payload): Json<VerifyRequest>,
) -> impl IntoResponse {
    let Some(user_id) = identity.and_then(|Extension(identity)| identity.user_id()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(Extension(context)) = context else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let accepted = match security.two_factor().verify(user_id, &payload.code).await {
        Ok(accepted) => accepted,
        Err(err) => {
            error!("2fa verification failed: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if !accepted {
        return SecurityError::TwoFactorInvalid.into_response();
    }

    // Verification holds for the lifetime of this session only.
    if let Err(err) = security
        .sessions()
        .mark_two_factor_verified(&context.session_hash)
        .await
    {
        error!("Failed to mark session 2fa-verified: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(user_id = %user_id, "two-factor verified for session");
    StatusCode::NO_CONTENT.into_response()
}
