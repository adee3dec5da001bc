//! OAuth bridge: third-party identity providers mapped to first-party users.
//!
//! Each provider implements [`OAuthProvider`]; the bridge logic (state
//! round-trip, find-or-create, token mint, cart merge, redirect) is
//! provider-agnostic. A flow entry keyed by the random `state` parameter
//! carries the pre-login cart session id across the consent redirect and is
//! consumed exactly once on callback.
//!
//! A callback whose profile lacks a usable email is rejected: accepting it
//! would persist an empty unique key and collide on the next such login.
//! Twitter's v2 user endpoint is the known case — it never returns an email.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Redirect, Response},
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, warn};
use url::Url;

use super::error::AuthError;
use super::session::{CART_SESSION_COOKIE_NAME, auth_cookies, cookie_value};
use super::state::AuthState;
use super::users::{self, InsertOutcome, UserRecord};
use super::utils::{generate_token, normalize_email};
use crate::APP_USER_AGENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Google,
    Facebook,
    Twitter,
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Facebook => "facebook",
            Self::Twitter => "twitter",
        }
    }

    /// Column holding this provider's external id on the users table.
    pub(super) fn id_column(&self) -> &'static str {
        match self {
            Self::Google => "google_id",
            Self::Facebook => "facebook_id",
            Self::Twitter => "twitter_id",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "google" => Ok(Self::Google),
            "facebook" => Ok(Self::Facebook),
            "twitter" => Ok(Self::Twitter),
            other => Err(anyhow!("unknown oauth provider: {other}")),
        }
    }
}

/// Identity payload a provider hands back after a successful code exchange.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub external_id: String,
    pub email: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Consent-screen URL the user agent is redirected to.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange the callback authorization code for a profile.
    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile>;
}

/// Static settings for one provider, fed from CLI/env.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    pub callback_url: String,
}

impl ProviderSettings {
    /// Build the concrete provider for `provider`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn into_provider(self, provider: Provider) -> Result<Arc<dyn OAuthProvider>> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build oauth http client")?;
        Ok(match provider {
            Provider::Google => Arc::new(GoogleProvider {
                settings: self,
                http,
            }),
            Provider::Facebook => Arc::new(FacebookProvider {
                settings: self,
                http,
            }),
            Provider::Twitter => Arc::new(TwitterProvider {
                settings: self,
                http,
            }),
        })
    }
}

#[derive(Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
}

pub struct GoogleProvider {
    settings: ProviderSettings,
    http: Client,
}

#[derive(Deserialize)]
struct GoogleProfile {
    id: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorize_url(&self, state: &str) -> String {
        build_url(
            "https://accounts.google.com/o/oauth2/v2/auth",
            &[
                ("response_type", "code"),
                ("client_id", &self.settings.client_id),
                ("redirect_uri", &self.settings.callback_url),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile> {
        let token: TokenExchangeResponse = self
            .http
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("code", code),
                ("client_id", &self.settings.client_id),
                ("client_secret", self.settings.client_secret.expose_secret()),
                ("redirect_uri", &self.settings.callback_url),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("google token exchange failed")?
            .error_for_status()
            .context("google token exchange rejected")?
            .json()
            .await
            .context("google token response malformed")?;

        let profile: GoogleProfile = self
            .http
            .get("https://www.googleapis.com/oauth2/v1/userinfo?alt=json")
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("google userinfo request failed")?
            .error_for_status()
            .context("google userinfo rejected")?
            .json()
            .await
            .context("google userinfo malformed")?;

        Ok(ProviderProfile {
            name: profile.name.unwrap_or_default(),
            external_id: profile.id,
            email: profile.email,
            avatar_url: profile.picture,
        })
    }
}

pub struct FacebookProvider {
    settings: ProviderSettings,
    http: Client,
}

#[derive(Deserialize)]
struct FacebookProfile {
    id: String,
    name: Option<String>,
    email: Option<String>,
    picture: Option<FacebookPicture>,
}

#[derive(Deserialize)]
struct FacebookPicture {
    data: FacebookPictureData,
}

#[derive(Deserialize)]
struct FacebookPictureData {
    url: Option<String>,
}

#[async_trait]
impl OAuthProvider for FacebookProvider {
    fn provider(&self) -> Provider {
        Provider::Facebook
    }

    fn authorize_url(&self, state: &str) -> String {
        build_url(
            "https://www.facebook.com/v19.0/dialog/oauth",
            &[
                ("client_id", &self.settings.client_id),
                ("redirect_uri", &self.settings.callback_url),
                ("scope", "email,public_profile"),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile> {
        let token: TokenExchangeResponse = self
            .http
            .get("https://graph.facebook.com/v19.0/oauth/access_token")
            .query(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.expose_secret()),
                ("redirect_uri", &self.settings.callback_url),
                ("code", code),
            ])
            .send()
            .await
            .context("facebook token exchange failed")?
            .error_for_status()
            .context("facebook token exchange rejected")?
            .json()
            .await
            .context("facebook token response malformed")?;

        let profile: FacebookProfile = self
            .http
            .get("https://graph.facebook.com/v19.0/me")
            .query(&[("fields", "id,name,email,picture.type(large)")])
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("facebook profile request failed")?
            .error_for_status()
            .context("facebook profile rejected")?
            .json()
            .await
            .context("facebook profile malformed")?;

        Ok(ProviderProfile {
            name: profile.name.unwrap_or_default(),
            external_id: profile.id,
            email: profile.email,
            avatar_url: profile.picture.and_then(|picture| picture.data.url),
        })
    }
}

pub struct TwitterProvider {
    settings: ProviderSettings,
    http: Client,
}

#[derive(Deserialize)]
struct TwitterProfileEnvelope {
    data: TwitterProfile,
}

#[derive(Deserialize)]
struct TwitterProfile {
    id: String,
    name: Option<String>,
    profile_image_url: Option<String>,
}

#[async_trait]
impl OAuthProvider for TwitterProvider {
    fn provider(&self) -> Provider {
        Provider::Twitter
    }

    fn authorize_url(&self, state: &str) -> String {
        build_url(
            "https://x.com/i/oauth2/authorize",
            &[
                ("response_type", "code"),
                ("client_id", &self.settings.client_id),
                ("redirect_uri", &self.settings.callback_url),
                ("scope", "tweet.read users.read"),
                ("state", state),
                // Confidential client; PKCE is required by the endpoint but
                // adds nothing here, so use the plain method.
                ("code_challenge", "challenge"),
                ("code_challenge_method", "plain"),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile> {
        let token: TokenExchangeResponse = self
            .http
            .post("https://api.x.com/2/oauth2/token")
            .basic_auth(
                &self.settings.client_id,
                Some(self.settings.client_secret.expose_secret()),
            )
            .form(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", &self.settings.callback_url),
                ("code_verifier", "challenge"),
            ])
            .send()
            .await
            .context("twitter token exchange failed")?
            .error_for_status()
            .context("twitter token exchange rejected")?
            .json()
            .await
            .context("twitter token response malformed")?;

        let envelope: TwitterProfileEnvelope = self
            .http
            .get("https://api.x.com/2/users/me")
            .query(&[("user.fields", "profile_image_url")])
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("twitter profile request failed")?
            .error_for_status()
            .context("twitter profile rejected")?
            .json()
            .await
            .context("twitter profile malformed")?;

        Ok(ProviderProfile {
            name: envelope.data.name.unwrap_or_default(),
            external_id: envelope.data.id,
            // The v2 user endpoint has no email claim; the bridge rejects
            // the login rather than persisting an empty unique key.
            email: None,
            avatar_url: envelope.data.profile_image_url,
        })
    }
}

fn build_url(base: &str, params: &[(&str, &str)]) -> String {
    Url::parse_with_params(base, params).map_or_else(|_| base.to_string(), Into::into)
}

/// Flow state parked between the consent redirect and the callback.
pub(super) struct FlowEntry {
    pub(super) provider: Provider,
    pub(super) cart_session_id: Option<String>,
    created_at: Instant,
}

/// In-memory store for in-flight OAuth round-trips, TTL pruned on access.
pub struct OAuthFlowStore {
    ttl: Duration,
    flows: Mutex<HashMap<String, FlowEntry>>,
}

impl OAuthFlowStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            flows: Mutex::new(HashMap::new()),
        }
    }

    pub(super) async fn start(
        &self,
        provider: Provider,
        cart_session_id: Option<String>,
    ) -> Result<String> {
        let state = generate_token()?;
        let mut flows = self.flows.lock().await;
        flows.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        flows.insert(
            state.clone(),
            FlowEntry {
                provider,
                cart_session_id,
                created_at: Instant::now(),
            },
        );
        Ok(state)
    }

    /// Consume the entry for `state`; a second take with the same value
    /// returns `None`.
    pub(super) async fn take(&self, state: &str) -> Option<FlowEntry> {
        let mut flows = self.flows.lock().await;
        let entry = flows.remove(state)?;
        (entry.created_at.elapsed() < self.ttl).then_some(entry)
    }
}

/// A provider email is only usable when present and non-blank. An empty
/// string must never reach the unique `email` column.
fn usable_email(profile: &ProviderProfile) -> Option<String> {
    profile
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(normalize_email)
}

/// Find-or-create for a resolved provider profile.
///
/// A returning account is matched by provider id first; failing that, an
/// existing account with the profile's email gains the provider id
/// (idempotently) and becomes verified; otherwise a fresh, already-verified
/// user is created. Never produces duplicate rows for one email.
pub(super) async fn resolve_user(
    pool: &PgPool,
    provider: Provider,
    profile: &ProviderProfile,
) -> Result<UserRecord, AuthError> {
    let Some(email) = usable_email(profile) else {
        return Err(AuthError::Authentication(format!(
            "{provider} did not supply an email address"
        )));
    };

    if let Some(known) = users::find_by_provider_id(pool, provider, &profile.external_id).await? {
        return Ok(known);
    }

    if let Some(existing) = users::find_by_email(pool, &email).await? {
        let updated = users::attach_provider_id(
            pool,
            existing.id,
            provider,
            &profile.external_id,
            profile.avatar_url.as_deref(),
        )
        .await?;
        return Ok(updated);
    }

    match users::insert_oauth_user(
        pool,
        provider,
        &profile.external_id,
        &email,
        &profile.name,
        profile.avatar_url.as_deref(),
    )
    .await?
    {
        InsertOutcome::Created(user) => Ok(user),
        InsertOutcome::Conflict => {
            // Lost a race with a concurrent first login; the row exists now.
            let existing = users::find_by_email(pool, &email)
                .await?
                .ok_or_else(|| AuthError::Authentication("OAuth sign-in failed".to_string()))?;
            let updated = users::attach_provider_id(
                pool,
                existing.id,
                provider,
                &profile.external_id,
                profile.avatar_url.as_deref(),
            )
            .await?;
            Ok(updated)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// `GET /auth/{provider}` — park flow state and redirect to the consent screen.
#[utoipa::path(
    get,
    path = "/auth/{provider}",
    params(("provider" = String, Path, description = "google | facebook | twitter")),
    responses(
        (status = 307, description = "Redirect to the provider consent screen"),
        (status = 404, description = "Unknown or unconfigured provider")
    ),
    tag = "oauth"
)]
pub async fn oauth_redirect(
    Path(provider): Path<String>,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let provider: Provider = provider
        .parse()
        .map_err(|_| AuthError::NotFound("Unknown provider".to_string()))?;
    let Some(oauth) = auth_state.provider(provider) else {
        return Err(AuthError::NotFound("Provider not configured".to_string()));
    };

    let cart_session_id = cookie_value(&headers, CART_SESSION_COOKIE_NAME);
    let state = auth_state
        .flows()
        .start(provider, cart_session_id)
        .await
        .context("failed to start oauth flow")?;

    Ok(Redirect::temporary(&oauth.authorize_url(&state)).into_response())
}

/// `GET /auth/{provider}/callback` — finish the round-trip.
///
/// Every failure path redirects to the sign-in page with no cookies set; a
/// successful resolution sets both auth cookies, merges any pre-login cart,
/// and redirects to the application root.
#[utoipa::path(
    get,
    path = "/auth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "google | facebook | twitter"),
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "Flow state value")
    ),
    responses(
        (status = 307, description = "Redirect to the application (cookies set) or the sign-in page (no cookies)")
    ),
    tag = "oauth"
)]
pub async fn oauth_callback(
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let sign_in = auth_state.config().sign_in_url();
    let home = auth_state.config().frontend_base_url().to_string();

    let Ok(provider) = provider.parse::<Provider>() else {
        return (StatusCode::NOT_FOUND, "Unknown provider".to_string()).into_response();
    };
    let Some(oauth) = auth_state.provider(provider) else {
        return (StatusCode::NOT_FOUND, "Provider not configured".to_string()).into_response();
    };

    if let Some(reason) = &params.error {
        warn!(%provider, %reason, "oauth consent denied");
        return Redirect::temporary(&sign_in).into_response();
    }
    let (Some(code), Some(state)) = (params.code.as_deref(), params.state.as_deref()) else {
        return Redirect::temporary(&sign_in).into_response();
    };

    // The state entry is single-use; replayed or expired callbacks fail here.
    let Some(flow) = auth_state.flows().take(state).await else {
        warn!(%provider, "oauth callback with unknown or expired state");
        return Redirect::temporary(&sign_in).into_response();
    };
    if flow.provider != provider {
        warn!(%provider, "oauth callback provider mismatch");
        return Redirect::temporary(&sign_in).into_response();
    }

    let profile = match oauth.exchange_code(code).await {
        Ok(profile) => profile,
        Err(err) => {
            error!(%provider, "oauth code exchange failed: {err:#}");
            return Redirect::temporary(&sign_in).into_response();
        }
    };

    let user = match resolve_user(&pool, provider, &profile).await {
        Ok(user) => user,
        Err(err) => {
            warn!(%provider, "oauth resolution failed: {err}");
            return Redirect::temporary(&sign_in).into_response();
        }
    };

    let tokens = auth_state.tokens();
    let (access_token, refresh_token) = match tokens
        .issue_access_token(user.id, user.role)
        .and_then(|access| {
            tokens
                .issue_refresh_token(user.id, user.role, None)
                .map(|refresh| (access, refresh))
        }) {
        Ok(pair) => pair,
        Err(err) => {
            error!(%provider, "token mint failed after oauth resolution: {err}");
            return Redirect::temporary(&sign_in).into_response();
        }
    };

    if let Some(cart_session_id) = &flow.cart_session_id {
        // Best effort: a failed merge must not lose the login.
        if let Err(err) = auth_state
            .cart()
            .merge_carts_on_login(cart_session_id, user.id)
            .await
        {
            error!(user_id = %user.id, "cart merge failed: {err:#}");
        }
    }

    let mut response_headers = HeaderMap::new();
    match auth_cookies(
        auth_state.config(),
        &access_token,
        &refresh_token,
        auth_state.config().refresh_ttl().as_secs(),
    ) {
        Ok(cookies) => {
            for cookie in cookies {
                response_headers.append(SET_COOKIE, cookie);
            }
        }
        Err(err) => {
            error!("failed to build auth cookies: {err}");
            return Redirect::temporary(&sign_in).into_response();
        }
    }

    (response_headers, Redirect::temporary(&home)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(kind: Provider) -> Arc<dyn OAuthProvider> {
        ProviderSettings {
            client_id: "client-id".to_string(),
            client_secret: SecretString::from("client-secret"),
            callback_url: "https://api.shop.example.com/auth/google/callback".to_string(),
        }
        .into_provider(kind)
        .expect("provider construction")
    }

    #[test]
    fn blank_provider_email_is_unusable() {
        let mut profile = ProviderProfile {
            external_id: "123".to_string(),
            email: None,
            name: "Some User".to_string(),
            avatar_url: None,
        };
        assert_eq!(usable_email(&profile), None);

        profile.email = Some("   ".to_string());
        assert_eq!(usable_email(&profile), None);

        profile.email = Some(" User@Example.COM ".to_string());
        assert_eq!(usable_email(&profile).as_deref(), Some("user@example.com"));
    }

    #[test]
    fn provider_parses_known_names() {
        assert_eq!("google".parse::<Provider>().ok(), Some(Provider::Google));
        assert_eq!(
            "facebook".parse::<Provider>().ok(),
            Some(Provider::Facebook)
        );
        assert_eq!("twitter".parse::<Provider>().ok(), Some(Provider::Twitter));
        assert!("github".parse::<Provider>().is_err());
    }

    #[test]
    fn authorize_url_carries_state_and_redirect() {
        let google = provider(Provider::Google);
        let url = google.authorize_url("state-value");
        assert!(url.starts_with("https://accounts.google.com/"));
        assert!(url.contains("state=state-value"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("redirect_uri="));
    }

    #[tokio::test]
    async fn flow_state_is_single_use() -> Result<()> {
        let store = OAuthFlowStore::new(Duration::from_secs(60));
        let state = store
            .start(Provider::Google, Some("cart-123".to_string()))
            .await?;
        let entry = store.take(&state).await.expect("first take");
        assert_eq!(entry.provider, Provider::Google);
        assert_eq!(entry.cart_session_id.as_deref(), Some("cart-123"));
        assert!(store.take(&state).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn flow_state_expires() -> Result<()> {
        let store = OAuthFlowStore::new(Duration::from_millis(5));
        let state = store.start(Provider::Facebook, None).await?;
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(store.take(&state).await.is_none());
        Ok(())
    }

    #[test]
    fn twitter_profile_has_no_email() {
        let envelope: TwitterProfileEnvelope = serde_json::from_value(serde_json::json!({
            "data": {"id": "t1", "name": "T", "profile_image_url": null}
        }))
        .expect("twitter profile");
        assert_eq!(envelope.data.id, "t1");
    }
}
