//! Auth handlers and supporting modules.
//!
//! This module coordinates account registration, password and OAuth sign-in,
//! token rotation, and email verification.
//!
//! ## Token model
//!
//! - **Access tokens** are short-lived stateless JWTs; verification is a
//!   signature plus expiry check with no storage round-trip.
//! - **Refresh tokens** carry a fixed absolute expiry that rotation never
//!   extends, and are single-use: rotating one atomically revokes it before
//!   a replacement is minted.
//!
//! ## Anti-enumeration
//!
//! Sign-in failures, verification-email requests, and forgot-password
//! requests answer identically whether or not the account exists.

pub(crate) mod cart;
pub(crate) mod error;
pub(crate) mod guard;
pub(crate) mod oauth;
pub(crate) mod password;
pub(crate) mod rate_limit;
pub(crate) mod revocation;
pub(crate) mod session;
pub(crate) mod signin;
pub(crate) mod signup;
mod state;
pub(crate) mod tokens;
pub(crate) mod types;
pub(crate) mod users;
mod utils;
pub(crate) mod verification;

pub use cart::{CartService, NoopCartService};
pub use error::AuthError;
pub use guard::{Principal, optional_auth, require_auth, require_role};
pub use oauth::{OAuthProvider, Provider, ProviderSettings};
pub use rate_limit::NoopRateLimiter;
pub use state::{AuthConfig, AuthState};
pub use tokens::TokenService;
