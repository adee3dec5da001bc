//! Access/refresh token issuance, verification, rotation, and revocation.
//!
//! Access tokens are stateless: signature + expiry only. Refresh tokens carry
//! an `abs_exp` claim bound at first mint; rotation copies it forward
//! unchanged, so repeated refreshes can never extend the session past the
//! window granted at sign-in. Revocation state lives in a [`RevocationStore`]
//! keyed by the token's SHA-256, with a TTL equal to the token's remaining
//! lifetime.

use anyhow::Context;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use super::error::AuthError;
use super::revocation::RevocationStore;
use super::users::Role;
use super::utils::hash_token;

/// Claims carried by both token kinds. `abs_exp` is only present on refresh
/// tokens; for those, `exp` always equals `abs_exp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_exp: Option<i64>,
}

pub struct TokenService {
    access_secret: SecretString,
    refresh_secret: SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
    revocations: Arc<dyn RevocationStore>,
}

impl TokenService {
    #[must_use]
    pub fn new(
        access_secret: SecretString,
        refresh_secret: SecretString,
        access_ttl: Duration,
        refresh_ttl: Duration,
        revocations: Arc<dyn RevocationStore>,
    ) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl,
            refresh_ttl,
            revocations,
        }
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign a short-lived access token for `{user_id, role}`.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue_access_token(&self, user_id: Uuid, role: Role) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.access_ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user_id,
            role,
            iat: now,
            exp: now.saturating_add(ttl),
            abs_exp: None,
        };
        sign(&claims, &self.access_secret)
    }

    /// Sign a refresh token. When `absolute_expiry` is given (rotation), the
    /// signed expiry is that value unchanged; otherwise it is `now + refresh
    /// TTL`. The signed `exp` can therefore never exceed the absolute bound.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue_refresh_token(
        &self,
        user_id: Uuid,
        role: Role,
        absolute_expiry: Option<i64>,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.refresh_ttl.as_secs()).unwrap_or(i64::MAX);
        let abs_exp = absolute_expiry.unwrap_or_else(|| now.saturating_add(ttl));
        let claims = Claims {
            sub: user_id,
            role,
            iat: now,
            exp: abs_exp,
            abs_exp: Some(abs_exp),
        };
        sign(&claims, &self.refresh_secret)
    }

    /// Verify an access token's signature and expiry.
    ///
    /// # Errors
    /// All failure modes collapse to `AuthError::Authentication`.
    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        verify(token, &self.access_secret)
    }

    /// Verify a refresh token, including the absolute-expiry bound. A token
    /// whose `abs_exp` has been reached (`now >= abs_exp`) is rejected even
    /// when the signature is intact.
    ///
    /// # Errors
    /// All failure modes collapse to `AuthError::Authentication`.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = verify(token, &self.refresh_secret)?;
        let Some(abs_exp) = claims.abs_exp else {
            return Err(AuthError::Authentication(
                "Invalid or expired refresh token".to_string(),
            ));
        };
        if Utc::now().timestamp() >= abs_exp {
            return Err(AuthError::Authentication(
                "Session expired. Please log in again.".to_string(),
            ));
        }
        Ok(claims)
    }

    /// Record a refresh token as revoked for its remaining lifetime.
    ///
    /// The token is decoded without signature verification: a sign-out must
    /// work even when the signing secret has rotated. Already-expired tokens
    /// are a no-op — there is nothing left to revoke.
    pub async fn revoke(&self, refresh_token: &str) {
        let Some(ttl) = remaining_ttl(refresh_token) else {
            return;
        };
        if let Err(err) = self
            .revocations
            .set_if_absent(&hash_token(refresh_token), ttl)
            .await
        {
            // Degraded but safe: the short access-token lifetime bounds the
            // window in which a missing revocation entry matters.
            warn!("failed to record refresh-token revocation: {err:#}");
        }
    }

    /// Whether the token has a live revocation entry.
    ///
    /// # Errors
    /// Returns an error if the store lookup fails.
    pub async fn is_revoked(&self, refresh_token: &str) -> Result<bool, AuthError> {
        let revoked = self
            .revocations
            .exists(&hash_token(refresh_token))
            .await
            .context("revocation lookup failed")?;
        Ok(revoked)
    }

    /// Atomically claim a refresh token for single-use rotation.
    ///
    /// Returns `true` when this call revoked the token (the caller may mint a
    /// replacement) and `false` when it was already revoked. Check-then-act
    /// is deliberately avoided: two concurrent rotations of the same token
    /// race on one `set_if_absent`, and only one wins.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn consume(&self, refresh_token: &str) -> Result<bool, AuthError> {
        let Some(ttl) = remaining_ttl(refresh_token) else {
            // Nothing to claim; verification has already rejected it.
            return Ok(false);
        };
        let claimed = self
            .revocations
            .set_if_absent(&hash_token(refresh_token), ttl)
            .await
            .context("revocation write failed")?;
        Ok(claimed)
    }
}

fn sign(claims: &Claims, secret: &SecretString) -> Result<String, AuthError> {
    let key = EncodingKey::from_secret(secret.expose_secret().as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key)
        .map_err(|err| AuthError::Internal(anyhow::Error::new(err).context("token signing")))
}

fn verify(token: &str, secret: &SecretString) -> Result<Claims, AuthError> {
    let key = DecodingKey::from_secret(secret.expose_secret().as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::Authentication("Invalid or expired token".to_string()))
}

/// Remaining lifetime until `abs_exp`, read without signature verification.
fn remaining_ttl(refresh_token: &str) -> Option<Duration> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    let data = decode::<Claims>(refresh_token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    let abs_exp = data.claims.abs_exp?;
    let ttl = abs_exp - Utc::now().timestamp();
    (ttl > 0).then(|| Duration::from_secs(ttl.unsigned_abs()))
}

#[cfg(test)]
mod tests {
    use super::super::revocation::MemoryRevocationStore;
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            SecretString::from("access-secret"),
            SecretString::from("refresh-secret"),
            Duration::from_secs(15 * 60),
            Duration::from_secs(24 * 60 * 60),
            Arc::new(MemoryRevocationStore::new()),
        )
    }

    #[test]
    fn access_token_round_trips_subject_and_role() -> Result<(), AuthError> {
        let service = service();
        let user_id = Uuid::new_v4();
        let token = service.issue_access_token(user_id, Role::Admin)?;
        let claims = service.verify_access(&token)?;
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, Role::Admin);
        assert!(claims.abs_exp.is_none());
        Ok(())
    }

    #[test]
    fn tokens_are_not_interchangeable_across_secrets() -> Result<(), AuthError> {
        let service = service();
        let token = service.issue_access_token(Uuid::new_v4(), Role::User)?;
        assert!(service.verify_refresh(&token).is_err());
        Ok(())
    }

    #[test]
    fn refresh_token_defaults_exp_to_abs_exp() -> Result<(), AuthError> {
        let service = service();
        let token = service.issue_refresh_token(Uuid::new_v4(), Role::User, None)?;
        let claims = service.verify_refresh(&token)?;
        assert_eq!(Some(claims.exp), claims.abs_exp);
        Ok(())
    }

    #[test]
    fn rotation_carries_abs_exp_forward_unchanged() -> Result<(), AuthError> {
        let service = service();
        let user_id = Uuid::new_v4();
        let first = service.issue_refresh_token(user_id, Role::User, None)?;
        let first_claims = service.verify_refresh(&first)?;

        let second = service.issue_refresh_token(user_id, Role::User, first_claims.abs_exp)?;
        let second_claims = service.verify_refresh(&second)?;
        assert_eq!(second_claims.abs_exp, first_claims.abs_exp);
        Ok(())
    }

    #[test]
    fn refresh_rejected_at_absolute_expiry_boundary() -> Result<(), AuthError> {
        let service = service();
        // abs_exp == now: the window is closed, not closing.
        let now = Utc::now().timestamp();
        let token = service.issue_refresh_token(Uuid::new_v4(), Role::User, Some(now))?;
        assert!(service.verify_refresh(&token).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn revoke_then_is_revoked() -> Result<(), AuthError> {
        let service = service();
        let token = service.issue_refresh_token(Uuid::new_v4(), Role::User, None)?;
        assert!(!service.is_revoked(&token).await?);
        service.revoke(&token).await;
        assert!(service.is_revoked(&token).await?);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent() -> Result<(), AuthError> {
        let service = service();
        let token = service.issue_refresh_token(Uuid::new_v4(), Role::User, None)?;
        service.revoke(&token).await;
        service.revoke(&token).await;
        assert!(service.is_revoked(&token).await?);
        Ok(())
    }

    #[tokio::test]
    async fn consume_succeeds_exactly_once() -> Result<(), AuthError> {
        let service = service();
        let token = service.issue_refresh_token(Uuid::new_v4(), Role::User, None)?;
        assert!(service.consume(&token).await?);
        assert!(!service.consume(&token).await?);
        Ok(())
    }

    #[tokio::test]
    async fn consume_rejects_expired_tokens() -> Result<(), AuthError> {
        let service = service();
        let past = Utc::now().timestamp() - 10;
        let token = service.issue_refresh_token(Uuid::new_v4(), Role::User, Some(past))?;
        assert!(!service.consume(&token).await?);
        Ok(())
    }

    #[test]
    fn tampered_token_is_rejected() -> Result<(), AuthError> {
        let service = service();
        let mut token = service.issue_access_token(Uuid::new_v4(), Role::User)?;
        token.push('x');
        assert!(service.verify_access(&token).is_err());
        Ok(())
    }
}
