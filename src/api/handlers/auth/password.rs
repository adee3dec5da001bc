//! Password reset: request a link, then redeem it.

use axum::{
    Json,
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::types::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest};
use super::users;
use super::utils::{
    build_reset_url, extract_client_ip, generate_token, hash_token, normalize_email, valid_email,
    valid_password,
};
use crate::api::email::{self, EmailTemplate};

const RESET_SENT: &str = "If an account exists for that email, a password reset email has been sent";

/// `POST /auth/forgot-password` — issue a reset link.
///
/// The raw token only appears in the emailed link; the database keeps its
/// SHA-256 hash. The acknowledgement is uniform whether or not the account
/// exists.
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Uniform acknowledgement", body = MessageResponse),
        (status = 400, description = "Malformed email")
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Response, AuthError> {
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(AuthError::Validation(
            "A valid email address is required".to_string(),
        ));
    }

    let client_ip = extract_client_ip(&headers);
    let limiter = auth_state.rate_limiter();
    if limiter.check_ip(client_ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
        || limiter.check_email(&email, RateLimitAction::ForgotPassword)
            == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited);
    }

    let token = generate_token()?;
    let mut tx = pool.begin().await?;
    let stored = users::set_reset_token(
        &mut tx,
        &email,
        &hash_token(&token),
        auth_state.config().reset_token_ttl_seconds(),
    )
    .await?;
    if stored {
        let reset_url = build_reset_url(auth_state.config().frontend_base_url(), &token);
        email::enqueue(
            &mut tx,
            &email,
            EmailTemplate::PasswordReset,
            json!({ "resetUrl": reset_url }),
        )
        .await?;
    }
    tx.commit().await?;

    Ok(Json(MessageResponse::ok(RESET_SENT)).into_response())
}

/// `POST /auth/reset-password` — redeem a reset token and set a new password.
///
/// Tokens are single-use: redemption clears the stored hash in the same
/// statement that writes the new password.
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid token or weak password")
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Response, AuthError> {
    if !valid_password(&request.new_password) {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters and contain a letter and a digit".to_string(),
        ));
    }

    let new_hash = users::hash_password(&request.new_password)?;
    let updated =
        users::consume_reset_token(&pool, &hash_token(request.token.trim()), &new_hash).await?;
    if !updated {
        return Err(AuthError::Validation(
            "Invalid or expired reset token".to_string(),
        ));
    }

    info!("password reset completed");
    Ok(Json(MessageResponse::ok("Password reset successfully")).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_acknowledgement_does_not_reveal_account_existence() {
        let body = serde_json::to_value(MessageResponse::ok(RESET_SENT)).expect("serialize");
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], RESET_SENT);
        assert!(RESET_SENT.starts_with("If an account exists"));
    }
}
