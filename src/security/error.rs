//! Security denial taxonomy and its HTTP mapping.
//!
//! All denials surface a generic, non-discriminating body: `Throttled` and
//! `Banned` are indistinguishable to the caller, and `InvalidCredentials`
//! never says whether the email or the password was wrong. The distinction
//! only exists internally, for audit logging.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("identifier is throttled")]
    Throttled,
    #[error("ip is banned")]
    Banned,
    #[error("csrf token missing or invalid")]
    CsrfInvalid,
    #[error("two-factor verification required")]
    TwoFactorRequired,
    #[error("two-factor code invalid")]
    TwoFactorInvalid,
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("session invalid or expired")]
    SessionInvalidOrExpired,
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SecurityError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::SessionInvalidOrExpired => StatusCode::UNAUTHORIZED,
            Self::Throttled
            | Self::Banned
            | Self::CsrfInvalid
            | Self::TwoFactorRequired
            | Self::TwoFactorInvalid => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response body shown to the caller. Deliberately coarse: throttle and
    /// ban share one message so neither aids reconnaissance.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid credentials",
            Self::Throttled | Self::Banned => "Access temporarily restricted",
            Self::CsrfInvalid => "Request could not be validated",
            Self::TwoFactorRequired => "Two-factor verification required",
            Self::TwoFactorInvalid => "Two-factor verification failed",
            Self::RateLimitExceeded => "Too many requests",
            Self::SessionInvalidOrExpired => "Authentication required",
            Self::Configuration(_) => "Internal server error",
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.public_message() });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_and_ban_are_indistinguishable() {
        assert_eq!(
            SecurityError::Throttled.public_message(),
            SecurityError::Banned.public_message()
        );
        assert_eq!(
            SecurityError::Throttled.status(),
            SecurityError::Banned.status()
        );
    }

    #[test]
    fn invalid_credentials_is_generic() {
        // The body must not leak whether the email exists.
        assert_eq!(
            SecurityError::InvalidCredentials.public_message(),
            "Invalid credentials"
        );
        assert_eq!(
            SecurityError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn rate_limit_maps_to_429() {
        assert_eq!(
            SecurityError::RateLimitExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn configuration_error_never_leaks_detail() {
        let err = SecurityError::Configuration("missing encryption key".to_string());
        assert_eq!(err.public_message(), "Internal server error");
    }
}
