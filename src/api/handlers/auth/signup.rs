//! Account registration.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::{CART_SESSION_COOKIE_NAME, cookie_value, issue_session, with_cookies};
use super::state::AuthState;
use super::types::{AuthResponse, SignUpRequest};
use super::users::{self, InsertOutcome, Role};
use super::utils::{
    extract_client_ip, generate_verification_code, hash_token, normalize_email, valid_email,
    valid_password,
};
use crate::api::email::{self, EmailTemplate};

/// `POST /auth/sign-up` — create an account and start a session.
///
/// The verification email is enqueued in the same transaction that inserts
/// the user, so a created account always has a pending email and a rolled
/// back insert never sends one. Duplicate emails are a 409.
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Account created, session started", body = AuthResponse),
        (status = 400, description = "Invalid name, email, or password"),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth"
)]
pub async fn sign_up(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<SignUpRequest>,
) -> Result<Response, AuthError> {
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::SignUp)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited);
    }

    let name = request.name.trim();
    if name.is_empty() {
        return Err(AuthError::Validation("Name is required".to_string()));
    }
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(AuthError::Validation(
            "A valid email address is required".to_string(),
        ));
    }
    if !valid_password(&request.password) {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters and contain a letter and a digit".to_string(),
        ));
    }
    let role = request.role.unwrap_or(Role::User);

    let password_hash = users::hash_password(&request.password)?;
    let code = generate_verification_code();
    let code_hash = hash_token(&code);

    let mut tx = pool.begin().await?;
    let outcome = users::insert_user(
        &mut tx,
        &email,
        name,
        &password_hash,
        role,
        &code_hash,
        auth_state.config().verification_code_ttl_seconds(),
    )
    .await?;
    let user = match outcome {
        InsertOutcome::Created(user) => user,
        InsertOutcome::Conflict => {
            return Err(AuthError::Conflict(
                "This email is already registered".to_string(),
            ));
        }
    };
    email::enqueue(
        &mut tx,
        &email,
        EmailTemplate::VerifyEmail,
        json!({ "name": user.name, "code": code }),
    )
    .await?;
    tx.commit().await?;

    info!(user_id = %user.id, "user registered");

    if let Some(cart_session_id) = cookie_value(&headers, CART_SESSION_COOKIE_NAME) {
        // Best effort: a failed merge must not block the registration.
        if let Err(err) = auth_state
            .cart()
            .merge_carts_on_login(&cart_session_id, user.id)
            .await
        {
            error!(user_id = %user.id, "cart merge failed: {err:#}");
        }
    }

    let (data, cookies) = issue_session(&auth_state, &user, None)?;
    Ok((
        StatusCode::CREATED,
        with_cookies(cookies),
        Json(AuthResponse {
            success: true,
            message: "User registered successfully. Please verify your email.".to_string(),
            data,
        }),
    )
        .into_response())
}
