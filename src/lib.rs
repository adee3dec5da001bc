//! # Storefront Auth
//!
//! `storefront-auth` is the authentication and session service of the
//! storefront backend. It owns sign-up/sign-in, email verification, password
//! reset, third-party OAuth sign-in, and the access/refresh token lifecycle.
//!
//! ## Token model
//!
//! - **Access tokens** are short-lived (15 minutes by default) signed JWTs.
//!   They are stateless: validity is purely signature + expiry.
//! - **Refresh tokens** carry an `abs_exp` claim fixed at first mint. Rotation
//!   mints a new pair but never extends `abs_exp`, so a stolen refresh token
//!   is bounded by the original session window.
//! - Rotation is **single-use**: redeeming a refresh token atomically records
//!   it as revoked, so two concurrent refresh calls cannot both succeed.
//!
//! ## Storage
//!
//! Postgres backs the user directory, the refresh-token revocation list
//! (TTL enforced in queries), and a transactional email outbox drained by a
//! background worker with bounded retries.
//!
//! Handlers never rely on ambient request state: the access guard resolves a
//! `Principal` explicitly and handlers thread it into their own calls.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
