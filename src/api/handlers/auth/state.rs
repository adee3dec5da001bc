//! Auth configuration and shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::cart::CartService;
use super::oauth::{OAuthFlowStore, OAuthProvider, Provider};
use super::rate_limit::RateLimiter;
use super::tokens::TokenService;

const DEFAULT_ACCESS_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_VERIFICATION_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_OAUTH_FLOW_TTL_SECONDS: u64 = 10 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    verification_code_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    oauth_flow_ttl: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECONDS),
            verification_code_ttl_seconds: DEFAULT_VERIFICATION_CODE_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            oauth_flow_ttl: Duration::from_secs(DEFAULT_OAUTH_FLOW_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_verification_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_oauth_flow_ttl_seconds(mut self, seconds: u64) -> Self {
        self.oauth_flow_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Where failed OAuth callbacks land: the sign-in page, no cookies set.
    #[must_use]
    pub fn sign_in_url(&self) -> String {
        format!("{}/sign-in", self.frontend_base_url.trim_end_matches('/'))
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub(super) fn verification_code_ttl_seconds(&self) -> i64 {
        self.verification_code_ttl_seconds
    }

    pub(super) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn oauth_flow_ttl(&self) -> Duration {
        self.oauth_flow_ttl
    }

    /// Cookies are only marked Secure when the frontend is served over HTTPS.
    pub(super) fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Everything the auth handlers share, constructed once at startup and
/// injected as an extension. No module-level singletons: the token service,
/// providers, and collaborators are all owned here.
pub struct AuthState {
    config: AuthConfig,
    tokens: TokenService,
    providers: HashMap<Provider, Arc<dyn OAuthProvider>>,
    flows: OAuthFlowStore,
    cart: Arc<dyn CartService>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        tokens: TokenService,
        providers: Vec<Arc<dyn OAuthProvider>>,
        cart: Arc<dyn CartService>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let flows = OAuthFlowStore::new(config.oauth_flow_ttl());
        let providers = providers
            .into_iter()
            .map(|provider| (provider.provider(), provider))
            .collect();
        Self {
            config,
            tokens,
            providers,
            flows,
            cart,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub(super) fn provider(&self, provider: Provider) -> Option<&Arc<dyn OAuthProvider>> {
        self.providers.get(&provider)
    }

    pub(super) fn flows(&self) -> &OAuthFlowStore {
        &self.flows
    }

    pub(super) fn cart(&self) -> &dyn CartService {
        self.cart.as_ref()
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

/// In-memory state for unit tests across the auth modules.
#[cfg(test)]
pub(crate) fn test_state(config: AuthConfig) -> AuthState {
    use secrecy::SecretString;

    let tokens = TokenService::new(
        SecretString::from("access-secret"),
        SecretString::from("refresh-secret"),
        config.access_ttl(),
        config.refresh_ttl(),
        Arc::new(super::revocation::MemoryRevocationStore::new()),
    );
    AuthState::new(
        config,
        tokens,
        Vec::new(),
        Arc::new(super::cart::NoopCartService),
        Arc::new(super::rate_limit::NoopRateLimiter),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://shop.example.com".to_string());

        assert_eq!(config.frontend_base_url(), "https://shop.example.com");
        assert_eq!(config.access_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(config.refresh_ttl(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.verification_code_ttl_seconds(), 600);
        assert_eq!(config.reset_token_ttl_seconds(), 600);
        assert!(config.cookie_secure());

        let config = config
            .with_access_ttl_seconds(60)
            .with_refresh_ttl_seconds(3600)
            .with_verification_code_ttl_seconds(120)
            .with_reset_token_ttl_seconds(180)
            .with_oauth_flow_ttl_seconds(30);

        assert_eq!(config.access_ttl(), Duration::from_secs(60));
        assert_eq!(config.refresh_ttl(), Duration::from_secs(3600));
        assert_eq!(config.verification_code_ttl_seconds(), 120);
        assert_eq!(config.reset_token_ttl_seconds(), 180);
        assert_eq!(config.oauth_flow_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn insecure_frontend_means_insecure_cookies() {
        let config = AuthConfig::new("http://localhost:3000".to_string());
        assert!(!config.cookie_secure());
        assert_eq!(config.sign_in_url(), "http://localhost:3000/sign-in");
    }

    #[test]
    fn state_starts_with_no_providers() {
        let state = test_state(AuthConfig::new("https://shop.example.com".to_string()));
        assert!(state.provider(Provider::Google).is_none());
    }
}
