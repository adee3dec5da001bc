//! Session transport and lifecycle: cookies, sign-out, and refresh rotation.
//!
//! Both tokens travel as HTTP-only, SameSite=Strict cookies so script can
//! never read them; the access token is additionally returned in the response
//! body for clients that prefer an Authorization header. The Secure attribute
//! follows the frontend scheme so local HTTP development still works.

use anyhow::Context;
use chrono::Utc;
use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;

use super::error::AuthError;
use super::state::{AuthConfig, AuthState};
use super::types::{AuthData, AuthResponse, MessageResponse};
use super::users::{self, UserRecord};

pub(super) const ACCESS_COOKIE_NAME: &str = "accessToken";
pub(super) const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Cookie carrying the anonymous cart session until it is merged on login.
pub(super) const CART_SESSION_COOKIE_NAME: &str = "cartSessionId";

/// Read one cookie's value from the request `Cookie` headers.
pub(super) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
        .find(|value| !value.is_empty())
}

/// Extract a bearer token from the `Authorization` header.
pub(super) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn build_cookie(
    name: &str,
    value: &str,
    max_age_seconds: u64,
    secure: bool,
) -> Result<HeaderValue, AuthError> {
    let mut cookie = format!("{name}={value}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    let header = HeaderValue::from_str(&cookie).context("invalid cookie header")?;
    Ok(header)
}

/// Build the `Set-Cookie` pair for a freshly minted token pair.
///
/// `refresh_max_age_seconds` is the full refresh TTL for a fresh sign-in and
/// the remaining absolute-expiry window for a rotation, so the cookie never
/// advertises a lifetime the token inside it does not have.
pub(super) fn auth_cookies(
    config: &AuthConfig,
    access_token: &str,
    refresh_token: &str,
    refresh_max_age_seconds: u64,
) -> Result<Vec<HeaderValue>, AuthError> {
    let secure = config.cookie_secure();
    Ok(vec![
        build_cookie(
            ACCESS_COOKIE_NAME,
            access_token,
            config.access_ttl().as_secs(),
            secure,
        )?,
        build_cookie(
            REFRESH_COOKIE_NAME,
            refresh_token,
            refresh_max_age_seconds,
            secure,
        )?,
    ])
}

/// Build the `Set-Cookie` pair that expires both auth cookies.
pub(super) fn clear_cookies(config: &AuthConfig) -> Result<Vec<HeaderValue>, AuthError> {
    let secure = config.cookie_secure();
    Ok(vec![
        build_cookie(ACCESS_COOKIE_NAME, "", 0, secure)?,
        build_cookie(REFRESH_COOKIE_NAME, "", 0, secure)?,
    ])
}

/// Mint a token pair for `user` and package it as body data plus cookies.
///
/// `absolute_expiry` is `None` for a fresh sign-in and the inherited bound
/// for a rotation, so a session can never outlive its original window.
pub(super) fn issue_session(
    state: &AuthState,
    user: &UserRecord,
    absolute_expiry: Option<i64>,
) -> Result<(AuthData, Vec<HeaderValue>), AuthError> {
    let access_token = state.tokens().issue_access_token(user.id, user.role)?;
    let refresh_token = state
        .tokens()
        .issue_refresh_token(user.id, user.role, absolute_expiry)?;
    let refresh_max_age = absolute_expiry.map_or_else(
        || state.config().refresh_ttl().as_secs(),
        |abs_exp| u64::try_from(abs_exp - Utc::now().timestamp()).unwrap_or(0),
    );
    let cookies = auth_cookies(state.config(), &access_token, &refresh_token, refresh_max_age)?;
    let data = AuthData {
        user: user.clone().into(),
        access_token,
    };
    Ok((data, cookies))
}

pub(super) fn with_cookies(cookies: Vec<HeaderValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        headers.append(SET_COOKIE, cookie);
    }
    headers
}

/// `GET /auth/sign-out` — revoke the refresh token and clear both cookies.
///
/// Idempotent: a missing, malformed, or already-revoked cookie still gets the
/// same 200 with cleared cookies.
#[utoipa::path(
    get,
    path = "/auth/sign-out",
    responses((status = 200, description = "Signed out", body = MessageResponse)),
    tag = "auth"
)]
pub async fn sign_out(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    if let Some(refresh_token) = cookie_value(&headers, REFRESH_COOKIE_NAME) {
        auth_state.tokens().revoke(&refresh_token).await;
    }

    let cookies = clear_cookies(auth_state.config())?;
    Ok((
        with_cookies(cookies),
        Json(MessageResponse::ok("Signed out successfully")),
    )
        .into_response())
}

/// `POST /auth/refresh-token` — rotate the refresh token.
///
/// The presented token is atomically consumed before a replacement is minted,
/// so two concurrent rotations of one token can only produce one new session.
/// The replacement inherits the original absolute expiry unchanged.
#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    responses(
        (status = 200, description = "New token pair issued", body = AuthResponse),
        (status = 401, description = "Missing, invalid, expired, or already-used refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh_token(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let Some(presented) = cookie_value(&headers, REFRESH_COOKIE_NAME) else {
        return Err(AuthError::Authentication(
            "No refresh token provided".to_string(),
        ));
    };

    let claims = auth_state.tokens().verify_refresh(&presented)?;

    if !auth_state.tokens().consume(&presented).await? {
        return Err(AuthError::Authentication(
            "Invalid or expired refresh token".to_string(),
        ));
    }

    // The account may have been deleted since the token was minted.
    let Some(user) = users::find_by_id(&pool, claims.sub).await? else {
        return Err(AuthError::Authentication(
            "Invalid or expired refresh token".to_string(),
        ));
    };

    let (data, cookies) = issue_session(&auth_state, &user, claims.abs_exp)?;
    Ok((
        StatusCode::OK,
        with_cookies(cookies),
        Json(AuthResponse {
            success: true,
            message: "Token refreshed".to_string(),
            data,
        }),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(raw: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(raw).expect("cookie header"));
        headers
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let headers = headers_with_cookie("cartSessionId=abc; refreshToken=tok.en.val");
        assert_eq!(
            cookie_value(&headers, REFRESH_COOKIE_NAME).as_deref(),
            Some("tok.en.val")
        );
        assert_eq!(cookie_value(&headers, ACCESS_COOKIE_NAME), None);
    }

    #[test]
    fn cookie_value_skips_empty_values() {
        let headers = headers_with_cookie("accessToken=; other=1");
        assert_eq!(cookie_value(&headers, ACCESS_COOKIE_NAME), None);
    }

    #[test]
    fn bearer_token_requires_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn cookies_are_http_only_and_strict() -> Result<(), AuthError> {
        let config = AuthConfig::new("https://shop.example.com".to_string());
        let cookies = auth_cookies(&config, "access.jwt", "refresh.jwt", 86400)?;
        assert_eq!(cookies.len(), 2);
        for cookie in &cookies {
            let value = cookie.to_str().expect("ascii cookie");
            assert!(value.contains("HttpOnly"));
            assert!(value.contains("SameSite=Strict"));
            assert!(value.contains("Secure"));
            assert!(value.contains("Path=/"));
        }
        assert!(cookies[0].to_str().expect("ascii").starts_with("accessToken=access.jwt"));
        Ok(())
    }

    #[test]
    fn insecure_frontend_drops_secure_attribute() -> Result<(), AuthError> {
        let config = AuthConfig::new("http://localhost:3000".to_string());
        let cookies = auth_cookies(&config, "a", "r", 86400)?;
        for cookie in &cookies {
            assert!(!cookie.to_str().expect("ascii cookie").contains("Secure"));
        }
        Ok(())
    }

    #[test]
    fn clear_cookies_zero_max_age() -> Result<(), AuthError> {
        let config = AuthConfig::new("https://shop.example.com".to_string());
        for cookie in clear_cookies(&config)? {
            assert!(cookie.to_str().expect("ascii cookie").contains("Max-Age=0"));
        }
        Ok(())
    }
}
