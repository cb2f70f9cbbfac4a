//! Explicit identity and session context threaded through the pipeline.
//!
//! No ambient "current user" state: the gateway resolves identity once and
//! inserts these values into the request extensions, where handlers read
//! them. They are read-only outside their owning components.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Who is making the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated { user_id: Uuid, roles: Vec<String> },
}

impl Identity {
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated { user_id, .. } => Some(*user_id),
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        match self {
            Self::Anonymous => false,
            Self::Authenticated { roles, .. } => roles.iter().any(|entry| entry == role),
        }
    }
}

/// Session-scoped state for the authenticated request.
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// SHA-256 of the presented session token; scopes CSRF tokens and the
    /// 2FA-verified flag.
    pub session_hash: Vec<u8>,
    /// Raw token as presented, needed for logout/extend operations.
    pub raw_token: String,
    pub remember_me: bool,
    pub two_factor_verified: bool,
    pub expires_at: DateTime<Utc>,
}
