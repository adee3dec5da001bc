//! Refresh-token revocation store.
//!
//! The store is a TTL'd key-value set keyed by the SHA-256 of the refresh
//! token. Presence of a key means "do not honor this token even though its
//! signature is valid". Entries expire on their own once the token's absolute
//! expiry has passed, so the set never grows beyond one refresh window.
//!
//! `set_if_absent` is the single atomic primitive: rotation uses it to claim
//! a token exactly once, which closes the check-then-revoke race between two
//! concurrent refresh calls presenting the same token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{Instrument, info_span};

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record `token_hash` as revoked for `ttl` unless a live entry already
    /// exists. Returns `true` when this call created the entry.
    async fn set_if_absent(&self, token_hash: &[u8], ttl: Duration) -> Result<bool>;

    /// Whether a live (unexpired) revocation entry exists.
    async fn exists(&self, token_hash: &[u8]) -> Result<bool>;
}

/// Postgres-backed store shared by all service instances.
///
/// TTL is enforced in the queries themselves; an expired row is reclaimable
/// in place, so no background sweeper is needed.
pub struct PgRevocationStore {
    pool: PgPool,
}

impl PgRevocationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    async fn set_if_absent(&self, token_hash: &[u8], ttl: Duration) -> Result<bool> {
        // One statement: insert, or take over an expired row. A live row wins
        // the conflict and affects zero rows, which is how the caller learns
        // the token was already revoked.
        let query = r"
            INSERT INTO revoked_refresh_tokens (token_hash, expires_at)
            VALUES ($1, NOW() + ($2 * INTERVAL '1 second'))
            ON CONFLICT (token_hash) DO UPDATE
            SET expires_at = EXCLUDED.expires_at
            WHERE revoked_refresh_tokens.expires_at <= NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let ttl_seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert revocation entry")?;
        Ok(result.rows_affected() == 1)
    }

    async fn exists(&self, token_hash: &[u8]) -> Result<bool> {
        let query = r"
            SELECT 1
            FROM revoked_refresh_tokens
            WHERE token_hash = $1
              AND expires_at > NOW()
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to check revocation entry")?;
        Ok(row.is_some())
    }
}

/// In-process store for tests and single-instance runs.
///
/// Expired entries are pruned lazily on every access.
#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: Mutex<HashMap<Vec<u8>, Instant>>,
}

impl MemoryRevocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn set_if_absent(&self, token_hash: &[u8], ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, expires_at| *expires_at > now);
        if entries.contains_key(token_hash) {
            return Ok(false);
        }
        entries.insert(token_hash.to_vec(), now + ttl);
        Ok(true)
    }

    async fn exists(&self, token_hash: &[u8]) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, expires_at| *expires_at > now);
        Ok(entries.contains_key(token_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_claims_exactly_once() -> Result<()> {
        let store = MemoryRevocationStore::new();
        assert!(store.set_if_absent(b"hash", Duration::from_secs(60)).await?);
        assert!(!store.set_if_absent(b"hash", Duration::from_secs(60)).await?);
        assert!(store.exists(b"hash").await?);
        Ok(())
    }

    #[tokio::test]
    async fn entries_expire_on_their_own() -> Result<()> {
        let store = MemoryRevocationStore::new();
        assert!(
            store
                .set_if_absent(b"hash", Duration::from_millis(10))
                .await?
        );
        assert!(store.exists(b"hash").await?);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(!store.exists(b"hash").await?);
        // The key is claimable again once the old entry has lapsed.
        assert!(
            store
                .set_if_absent(b"hash", Duration::from_secs(60))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn distinct_hashes_do_not_collide() -> Result<()> {
        let store = MemoryRevocationStore::new();
        assert!(store.set_if_absent(b"a", Duration::from_secs(60)).await?);
        assert!(!store.exists(b"b").await?);
        Ok(())
    }
}
