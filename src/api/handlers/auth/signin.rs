//! Password sign-in.

use axum::{
    Json,
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use super::error::{AuthError, INVALID_CREDENTIALS};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::{CART_SESSION_COOKIE_NAME, cookie_value, issue_session, with_cookies};
use super::state::AuthState;
use super::types::{AuthResponse, SignInRequest};
use super::users::{self, verify_password};
use super::utils::{extract_client_ip, normalize_email};

/// `POST /auth/sign-in` — password authentication.
///
/// Unknown email, wrong password, and an OAuth-only account with no password
/// all answer with the same 401 message, so the endpoint cannot be used to
/// probe which accounts exist.
#[utoipa::path(
    post,
    path = "/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Session started", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn sign_in(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<SignInRequest>,
) -> Result<Response, AuthError> {
    let email = normalize_email(&request.email);

    let client_ip = extract_client_ip(&headers);
    let limiter = auth_state.rate_limiter();
    if limiter.check_ip(client_ip.as_deref(), RateLimitAction::SignIn)
        == RateLimitDecision::Limited
        || limiter.check_email(&email, RateLimitAction::SignIn) == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited);
    }

    let Some(user) = users::find_by_email(&pool, &email).await? else {
        return Err(AuthError::Authentication(INVALID_CREDENTIALS.to_string()));
    };
    // OAuth-only accounts have no password hash and cannot sign in here.
    let Some(stored_hash) = user.password_hash.as_deref() else {
        return Err(AuthError::Authentication(INVALID_CREDENTIALS.to_string()));
    };
    if !verify_password(&request.password, stored_hash) {
        return Err(AuthError::Authentication(INVALID_CREDENTIALS.to_string()));
    }

    if let Some(cart_session_id) = cookie_value(&headers, CART_SESSION_COOKIE_NAME) {
        // Best effort: a failed merge must not block the login.
        if let Err(err) = auth_state
            .cart()
            .merge_carts_on_login(&cart_session_id, user.id)
            .await
        {
            error!(user_id = %user.id, "cart merge failed: {err:#}");
        }
    }

    info!(user_id = %user.id, "user signed in");

    let (data, cookies) = issue_session(&auth_state, &user, None)?;
    Ok((
        with_cookies(cookies),
        Json(AuthResponse {
            success: true,
            message: "Signed in successfully".to_string(),
            data,
        }),
    )
        .into_response())
}
