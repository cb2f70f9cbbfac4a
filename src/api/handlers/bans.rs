//! Operator controls for IP bans. The gateway enforces the admin role before
//! these handlers run.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::security::Security;

const DEFAULT_BAN_SECONDS: i64 = 24 * 60 * 60;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BanRequest {
    pub ip: String,
    /// Defaults to 24 hours.
    pub duration_seconds: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/v1/admin/bans",
    request_body = BanRequest,
    responses(
        (status = 201, description = "IP banned."),
        (status = 400, description = "Invalid ban request."),
        (status = 403, description = "Admin role required."),
    ),
    tag = "admin"
)]
pub async fn create_ban(
    security: Extension<Arc<Security>>,
    Json(payload): Json<BanRequest>,
) -> impl IntoResponse {
    let ip = payload.ip.trim();
    let duration = payload.duration_seconds.unwrap_or(DEFAULT_BAN_SECONDS);
    if ip.is_empty() || duration <= 0 {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match security.throttle().ban_ip(ip, duration).await {
        Ok(()) => {
            info!(ip = %ip, duration_seconds = duration, "ip banned");
            StatusCode::CREATED.into_response()
        }
        Err(err) => {
            error!("Failed to ban ip: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/admin/bans/{ip}",
    params(("ip" = String, Path, description = "Banned IP address")),
    responses(
        (status = 204, description = "Ban lifted."),
        (status = 404, description = "No such ban."),
        (status = 403, description = "Admin role required."),
    ),
    tag = "admin"
)]
pub async fn delete_ban(
    security: Extension<Arc<Security>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    match security.throttle().unban_ip(&ip).await {
        Ok(true) => {
            info!(ip = %ip, "ip ban lifted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to lift ip ban: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
