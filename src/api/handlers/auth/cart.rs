//! Cart collaborator consumed by the OAuth callback.
//!
//! When a guest signs in, whatever cart they built under the anonymous
//! session id is merged into their account cart. The merge is best-effort:
//! a failure is logged and the login still succeeds.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait CartService: Send + Sync {
    /// Merge the cart stored under `anonymous_session_id` into `user_id`'s cart.
    async fn merge_carts_on_login(&self, anonymous_session_id: &str, user_id: Uuid) -> Result<()>;
}

/// Stand-in for deployments without a cart backend; logs and succeeds.
#[derive(Clone, Debug)]
pub struct NoopCartService;

#[async_trait]
impl CartService for NoopCartService {
    async fn merge_carts_on_login(&self, anonymous_session_id: &str, user_id: Uuid) -> Result<()> {
        info!(
            anonymous_session_id = %anonymous_session_id,
            user_id = %user_id,
            "cart merge stub"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_merge_succeeds() {
        let cart = NoopCartService;
        assert!(
            cart.merge_carts_on_login("anon-session", Uuid::new_v4())
                .await
                .is_ok()
        );
    }
}
