//! Email verification: code resend and code redemption.

use axum::{
    Json,
    extract::{Extension, Path},
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
use super::types::{MessageResponse, VerifyEmailRequest};
use super::users;
use super::utils::{
    extract_client_ip, generate_verification_code, hash_token, normalize_email, valid_email,
};
use crate::api::email::{self, EmailTemplate};

const VERIFICATION_SENT: &str = "If an account exists for that email, a verification email has been sent";

/// `GET /auth/verification-email/{email}` — (re)send a verification code.
///
/// The response is identical whether the account exists, is already verified,
/// or is unknown; only the side effect differs.
#[utoipa::path(
    get,
    path = "/auth/verification-email/{email}",
    params(("email" = String, Path, description = "Recipient email address")),
    responses(
        (status = 200, description = "Uniform acknowledgement", body = MessageResponse),
        (status = 400, description = "Malformed email")
    ),
    tag = "auth"
)]
pub async fn send_verification_email(
    Path(email): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let email = normalize_email(&email);
    if !valid_email(&email) {
        return Err(AuthError::Validation(
            "A valid email address is required".to_string(),
        ));
    }

    let client_ip = extract_client_ip(&headers);
    let limiter = auth_state.rate_limiter();
    if limiter.check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
        || limiter.check_email(&email, RateLimitAction::VerifyEmail) == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited);
    }

    if let Some(user) = users::find_by_email(&pool, &email).await? {
        if !user.email_verified {
            let code = generate_verification_code();
            let mut tx = pool.begin().await?;
            let stored = users::set_verification_code(
                &mut tx,
                &email,
                &hash_token(&code),
                auth_state.config().verification_code_ttl_seconds(),
            )
            .await?;
            if stored {
                email::enqueue(
                    &mut tx,
                    &email,
                    EmailTemplate::VerifyEmail,
                    json!({ "name": user.name, "code": code }),
                )
                .await?;
            }
            tx.commit().await?;
        }
    }

    Ok(Json(MessageResponse::ok(VERIFICATION_SENT)).into_response())
}

/// `POST /auth/verify-email` — redeem a verification code.
///
/// Codes are single-use: redemption clears the stored hash, so a replay of
/// the same code fails.
#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired code")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Response, AuthError> {
    let email = normalize_email(&request.email);
    let code = request.code.trim();
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AuthError::Validation(
            "Invalid or expired verification code".to_string(),
        ));
    }

    let verified = users::consume_verification_code(&pool, &email, &hash_token(code)).await?;
    if !verified {
        return Err(AuthError::Validation(
            "Invalid or expired verification code".to_string(),
        ));
    }

    info!(%email, "email verified");
    Ok(Json(MessageResponse::ok("Email verified successfully")).into_response())
}
