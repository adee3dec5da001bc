use crate::api::{self, handlers::auth};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub access_token_secret: SecretString,
    pub refresh_token_secret: SecretString,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    pub frontend_base_url: String,
    pub verification_code_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub oauth_flow_ttl_seconds: u64,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
    pub providers: Vec<(auth::Provider, auth::ProviderSettings)>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if provider construction or server startup fails.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = auth::AuthConfig::new(args.frontend_base_url)
        .with_access_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_token_ttl_seconds)
        .with_verification_code_ttl_seconds(args.verification_code_ttl_seconds)
        .with_reset_token_ttl_seconds(args.reset_token_ttl_seconds)
        .with_oauth_flow_ttl_seconds(args.oauth_flow_ttl_seconds);

    let providers = args
        .providers
        .into_iter()
        .map(|(provider, settings)| settings.into_provider(provider))
        .collect::<Result<Vec<Arc<dyn auth::OAuthProvider>>>>()?;

    let outbox_config = api::OutboxConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    api::new(
        args.port,
        args.dsn,
        auth_config,
        args.access_token_secret,
        args.refresh_token_secret,
        providers,
        outbox_config,
    )
    .await
}
