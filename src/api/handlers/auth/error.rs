//! Error taxonomy for the auth surface.
//!
//! Every failure a handler can produce maps to one of these variants, and the
//! variant alone decides the HTTP status. Token and crypto failures from the
//! underlying libraries are always normalized to [`AuthError::Authentication`]
//! before they cross the handler boundary, so responses never leak which
//! internal check failed.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Uniform message for credential failures so responses cannot be used to
/// enumerate accounts (unknown email and wrong password read the same).
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed input (400).
    #[error("{0}")]
    Validation(String),

    /// Bad credentials or an expired/revoked/invalid token (401).
    #[error("{0}")]
    Authentication(String),

    /// Authenticated but not allowed (403).
    #[error("{0}")]
    Authorization(String),

    /// Referenced entity does not exist (404).
    #[error("{0}")]
    NotFound(String),

    /// Duplicate unique key, e.g. an already-registered email (409).
    #[error("{0}")]
    Conflict(String),

    /// Too many attempts from one client or for one account (429).
    #[error("Too many requests, please try again later")]
    RateLimited,

    /// Anything unexpected (500). The cause is logged, never returned.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(err) => {
                error!("internal error: {err:#}");
                "Something went wrong".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "success": false,
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            AuthError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::Authentication("no".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Authorization("no".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::NotFound("gone".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AuthError::Conflict("dup".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AuthError::RateLimited.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::Internal(anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_message_is_generic() {
        let response = AuthError::Internal(anyhow!("connection refused")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn display_uses_the_carried_message() {
        let err = AuthError::Conflict("This email is already registered".into());
        assert_eq!(err.to_string(), "This email is already registered");
    }
}
