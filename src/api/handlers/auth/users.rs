//! User directory: lookups, creation, and credential updates.
//!
//! Password hashes are write-only: they are argon2id-hashed before they reach
//! the database and there is no decrypt path. Verification codes and reset
//! tokens are stored as SHA-256 hashes next to their expiry.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::fmt;
use std::str::FromStr;
use tracing::Instrument;
use uuid::Uuid;

use super::oauth::Provider;
use super::utils::is_unique_violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
            Self::Superadmin => "SUPERADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "USER" => Ok(Self::User),
            "ADMIN" => Ok(Self::Admin),
            "SUPERADMIN" => Ok(Self::Superadmin),
            other => Err(anyhow!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub permissions: Vec<String>,
}

const USER_COLUMNS: &str =
    "id, email, name, password_hash, role, avatar_url, email_verified, permissions";

fn map_user(row: &PgRow) -> Result<UserRecord> {
    let role: String = row.get("role");
    Ok(UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        role: role.parse()?,
        avatar_url: row.get("avatar_url"),
        email_verified: row.get("email_verified"),
        permissions: row.get("permissions"),
    })
}

/// Hash a plaintext password with a per-record salt.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("password hashing failed: {err}"))?;
    Ok(hash.to_string())
}

/// Constant-shape verification; returns `false` for any mismatch or malformed
/// stored hash rather than distinguishing the cases.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

pub(crate) async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;
    row.as_ref().map(map_user).transpose()
}

pub(crate) async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;
    row.as_ref().map(map_user).transpose()
}

pub(crate) async fn find_by_provider_id(
    pool: &PgPool,
    provider: Provider,
    external_id: &str,
) -> Result<Option<UserRecord>> {
    let query = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {} = $1",
        provider.id_column()
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(external_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by provider id")?;
    row.as_ref().map(map_user).transpose()
}

/// Outcome when attempting to create a new password-based user.
#[derive(Debug)]
pub(crate) enum InsertOutcome {
    Created(UserRecord),
    Conflict,
}

/// Insert a password-based user along with their first verification code —
/// one transaction so the outbox row never references a missing user.
pub(crate) async fn insert_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    name: &str,
    password_hash: &str,
    role: Role,
    code_hash: &[u8],
    code_ttl_seconds: i64,
) -> Result<InsertOutcome> {
    let query = format!(
        r"
        INSERT INTO users
            (email, name, password_hash, role, email_verified,
             verification_code_hash, verification_expires_at)
        VALUES ($1, $2, $3, $4, FALSE, $5, NOW() + ($6 * INTERVAL '1 second'))
        RETURNING {USER_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(code_hash)
        .bind(code_ttl_seconds)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(InsertOutcome::Created(map_user(&row)?)),
        Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

/// Insert a user resolved from an OAuth profile; providers are trusted to
/// have verified email ownership, so the record starts verified.
pub(crate) async fn insert_oauth_user(
    pool: &PgPool,
    provider: Provider,
    external_id: &str,
    email: &str,
    name: &str,
    avatar_url: Option<&str>,
) -> Result<InsertOutcome> {
    let query = format!(
        r"
        INSERT INTO users
            (email, name, role, email_verified, avatar_url, {})
        VALUES ($1, $2, 'USER', TRUE, $3, $4)
        RETURNING {USER_COLUMNS}
    ",
        provider.id_column()
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .bind(name)
        .bind(avatar_url)
        .bind(external_id)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(InsertOutcome::Created(map_user(&row)?)),
        Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert oauth user"),
    }
}

/// Attach a provider id to an existing account (idempotent) and force the
/// email verified — the provider has proven ownership of the address.
pub(crate) async fn attach_provider_id(
    pool: &PgPool,
    user_id: Uuid,
    provider: Provider,
    external_id: &str,
    avatar_url: Option<&str>,
) -> Result<UserRecord> {
    let column = provider.id_column();
    let query = format!(
        r"
        UPDATE users
        SET {column} = COALESCE({column}, $2),
            avatar_url = COALESCE(avatar_url, $3),
            email_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(external_id)
        .bind(avatar_url)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to attach provider id")?;
    map_user(&row)
}

/// Store a fresh verification code hash for `email`. Returns `false` when no
/// such account exists (callers respond identically either way).
pub(crate) async fn set_verification_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    code_hash: &[u8],
    ttl_seconds: i64,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET verification_code_hash = $2,
            verification_expires_at = NOW() + ($3 * INTERVAL '1 second'),
            updated_at = NOW()
        WHERE email = $1
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(code_hash)
        .bind(ttl_seconds)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to store verification code")?;
    Ok(row.is_some())
}

/// Consume a pending verification code: mark the user verified and clear the
/// code in one statement. Scoped to `email` because a six-digit code is not
/// unique across accounts. Returns `false` when unmatched or expired.
pub(crate) async fn consume_verification_code(
    pool: &PgPool,
    email: &str,
    code_hash: &[u8],
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET email_verified = TRUE,
            verification_code_hash = NULL,
            verification_expires_at = NULL,
            updated_at = NOW()
        WHERE email = $1
          AND verification_code_hash = $2
          AND verification_expires_at > NOW()
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(code_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume verification code")?;
    Ok(row.is_some())
}

/// Store a password-reset token hash for `email`. Returns `false` when the
/// account does not exist.
pub(crate) async fn set_reset_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET reset_token_hash = $2,
            reset_expires_at = NOW() + ($3 * INTERVAL '1 second'),
            updated_at = NOW()
        WHERE email = $1
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(token_hash)
        .bind(ttl_seconds)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to store reset token")?;
    Ok(row.is_some())
}

/// Consume a reset token: replace the password hash and invalidate the token
/// in one statement. Returns `false` when unmatched or expired.
pub(crate) async fn consume_reset_token(
    pool: &PgPool,
    token_hash: &[u8],
    new_password_hash: &str,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            reset_token_hash = NULL,
            reset_expires_at = NULL,
            updated_at = NOW()
        WHERE reset_token_hash = $1
          AND reset_expires_at > NOW()
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(new_password_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume reset token")?;
    Ok(row.is_some())
}

/// Hard delete (admin action); owned resources cascade via DB constraints.
pub(crate) async fn delete_user(pool: &PgPool, id: Uuid) -> Result<bool> {
    let query = "DELETE FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user")?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_text() -> Result<()> {
        for role in [Role::User, Role::Admin, Role::Superadmin] {
            assert_eq!(role.as_str().parse::<Role>()?, role);
        }
        assert!("user".parse::<Role>().is_err());
        Ok(())
    }

    #[test]
    fn role_serializes_uppercase() -> Result<()> {
        let json = serde_json::to_string(&Role::Superadmin)?;
        assert_eq!(json, "\"SUPERADMIN\"");
        Ok(())
    }

    #[test]
    fn password_hash_verifies_and_rejects() -> Result<()> {
        let hash = hash_password("Valid1!aaa")?;
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Valid1!aaa", &hash));
        assert!(!verify_password("wrong-password", &hash));
        Ok(())
    }

    #[test]
    fn password_hashes_are_salted() -> Result<()> {
        let first = hash_password("Valid1!aaa")?;
        let second = hash_password("Valid1!aaa")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn verify_password_tolerates_garbage_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
