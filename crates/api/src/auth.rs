//! Caller identity supplied by the authentication layer in front of the API.
//!
//! The service does not authenticate anyone itself. It trusts the
//! `x-user-id` header (a user UUID) and the optional `x-user-role: admin`
//! header set upstream.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use checkout::Access;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const ADMIN_ROLE: &str = "admin";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Identity {
    pub fn access(&self) -> Access {
        if self.is_admin {
            Access::Admin
        } else {
            Access::Owner(self.user_id)
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.user_id, "admin route refused");
            Err(ApiError::Forbidden("Not authorized as an admin".to_string()))
        }
    }

    fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let raw = headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Not authorized, no identity".to_string()))?;

        let user_id = raw
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized("Not authorized, invalid identity".to_string()))?;

        let is_admin = headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case(ADMIN_ROLE));

        Ok(Self { user_id, is_admin })
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
