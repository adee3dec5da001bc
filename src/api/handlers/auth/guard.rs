//! Access guard: turn request credentials into an explicit principal.
//!
//! Handlers that need an identity call [`require_auth`] and receive a
//! [`Principal`] value to pass along; nothing is stashed on ambient request
//! state. The bearer header wins over the cookie when both are present.

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use super::error::AuthError;
use super::session::{ACCESS_COOKIE_NAME, bearer_token, cookie_value};
use super::state::AuthState;
use super::users::{self, Role};

/// Verified identity for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

fn access_token(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| cookie_value(headers, ACCESS_COOKIE_NAME))
}

/// Authenticate the request or fail with 401.
///
/// The token's subject is re-checked against the user directory so a deleted
/// account cannot keep using a still-valid access token.
///
/// # Errors
/// `AuthError::Authentication` when no credential is presented, the token
/// fails verification, or the subject no longer exists.
pub async fn require_auth(
    headers: &HeaderMap,
    state: &AuthState,
    pool: &PgPool,
) -> Result<Principal, AuthError> {
    let Some(token) = access_token(headers) else {
        return Err(AuthError::Authentication(
            "Not authenticated".to_string(),
        ));
    };
    let claims = state.tokens().verify_access(&token)?;
    let Some(user) = users::find_by_id(pool, claims.sub).await? else {
        return Err(AuthError::Authentication(
            "Not authenticated".to_string(),
        ));
    };
    Ok(Principal {
        user_id: user.id,
        role: user.role,
    })
}

/// Like [`require_auth`] but absent or bad credentials yield `None` instead
/// of an error. Only infrastructure failures propagate.
pub async fn optional_auth(
    headers: &HeaderMap,
    state: &AuthState,
    pool: &PgPool,
) -> Result<Option<Principal>, AuthError> {
    match require_auth(headers, state, pool).await {
        Ok(principal) => Ok(Some(principal)),
        Err(AuthError::Authentication(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Authorize an already-authenticated principal against an allow-list.
///
/// # Errors
/// `AuthError::Authorization` when the principal's role is not allowed.
pub fn require_role(principal: &Principal, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.contains(&principal.role) {
        Ok(())
    } else {
        Err(AuthError::Authorization(
            "You do not have permission to perform this action".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn role_allow_list_is_enforced() {
        let admin = principal(Role::Admin);
        assert!(require_role(&admin, &[Role::Admin, Role::Superadmin]).is_ok());

        let user = principal(Role::User);
        let err = require_role(&user, &[Role::Admin]).expect_err("user is not admin");
        assert!(matches!(err, AuthError::Authorization(_)));
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        use axum::http::{HeaderValue, header::{AUTHORIZATION, COOKIE}};

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(
            COOKIE,
            HeaderValue::from_static("accessToken=from-cookie"),
        );
        assert_eq!(access_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn cookie_is_fallback_credential() {
        use axum::http::{HeaderValue, header::COOKIE};

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("accessToken=from-cookie"),
        );
        assert_eq!(access_token(&headers).as_deref(), Some("from-cookie"));
    }
}
