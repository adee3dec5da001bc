use anyhow::{Context, Result};
use clap::{Arg, Command};
use secrecy::SecretString;

use crate::api::handlers::auth::{Provider, ProviderSettings};

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_auth_email_args(command);
    let command = with_auth_outbox_args(command);
    with_oauth_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("access-token-secret")
                .long("access-token-secret")
                .help("HMAC secret used to sign access tokens")
                .env("STOREFRONT_AUTH_ACCESS_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("refresh-token-secret")
                .long("refresh-token-secret")
                .help("HMAC secret used to sign refresh tokens")
                .env("STOREFRONT_AUTH_REFRESH_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token TTL in seconds")
                .env("STOREFRONT_AUTH_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token absolute TTL in seconds; rotation never extends it")
                .env("STOREFRONT_AUTH_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_auth_email_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for reset links, CORS, and OAuth redirects")
                .env("STOREFRONT_AUTH_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new("verification-code-ttl-seconds")
                .long("verification-code-ttl-seconds")
                .help("Email verification code TTL in seconds")
                .env("STOREFRONT_AUTH_VERIFICATION_CODE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("reset-token-ttl-seconds")
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds")
                .env("STOREFRONT_AUTH_RESET_TOKEN_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("oauth-flow-ttl-seconds")
                .long("oauth-flow-ttl-seconds")
                .help("TTL for in-flight OAuth flow state")
                .env("STOREFRONT_AUTH_OAUTH_FLOW_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_auth_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-outbox-poll-seconds")
                .long("email-outbox-poll-seconds")
                .help("Email outbox poll interval in seconds")
                .env("STOREFRONT_AUTH_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-batch-size")
                .long("email-outbox-batch-size")
                .help("Email outbox batch size per poll")
                .env("STOREFRONT_AUTH_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-outbox-max-attempts")
                .long("email-outbox-max-attempts")
                .help("Max attempts before marking an email as failed")
                .env("STOREFRONT_AUTH_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("email-outbox-backoff-base-seconds")
                .long("email-outbox-backoff-base-seconds")
                .help("Base delay for email outbox retry backoff")
                .env("STOREFRONT_AUTH_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-backoff-max-seconds")
                .long("email-outbox-backoff-max-seconds")
                .help("Max delay for email outbox retry backoff")
                .env("STOREFRONT_AUTH_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_oauth_args(command: Command) -> Command {
    let mut command = command;
    for provider in ["google", "facebook", "twitter"] {
        let client_id = format!("{provider}-client-id");
        let client_secret = format!("{provider}-client-secret");
        let callback_url = format!("{provider}-callback-url");
        let env_prefix = provider.to_uppercase();
        command = command
            .arg(
                Arg::new(client_id.clone())
                    .long(client_id)
                    .help(format!("OAuth client id for {provider}"))
                    .env(format!("STOREFRONT_AUTH_{env_prefix}_CLIENT_ID")),
            )
            .arg(
                Arg::new(client_secret.clone())
                    .long(client_secret)
                    .help(format!("OAuth client secret for {provider}"))
                    .env(format!("STOREFRONT_AUTH_{env_prefix}_CLIENT_SECRET"))
                    .hide_env_values(true),
            )
            .arg(
                Arg::new(callback_url.clone())
                    .long(callback_url)
                    .help(format!("OAuth callback URL for {provider}"))
                    .env(format!("STOREFRONT_AUTH_{env_prefix}_CALLBACK_URL")),
            );
    }
    command
}

#[derive(Debug)]
pub struct OutboxOptions {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

/// Parsed auth options, ready for the server action.
pub struct Options {
    pub access_token_secret: SecretString,
    pub refresh_token_secret: SecretString,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    pub frontend_base_url: String,
    pub verification_code_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub oauth_flow_ttl_seconds: u64,
    pub outbox: OutboxOptions,
    pub providers: Vec<(Provider, ProviderSettings)>,
}

impl Options {
    /// Extract auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error when a required argument is missing or a provider is
    /// only partially configured.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let access_token_secret = matches
            .get_one::<String>("access-token-secret")
            .map(|secret| SecretString::from(secret.as_str()))
            .context("missing required argument: --access-token-secret")?;
        let refresh_token_secret = matches
            .get_one::<String>("refresh-token-secret")
            .map(|secret| SecretString::from(secret.as_str()))
            .context("missing required argument: --refresh-token-secret")?;

        let providers = [Provider::Google, Provider::Facebook, Provider::Twitter]
            .into_iter()
            .filter_map(|provider| {
                provider_settings(matches, provider)
                    .map(|settings| settings.map(|settings| (provider, settings)))
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            access_token_secret,
            refresh_token_secret,
            access_token_ttl_seconds: matches
                .get_one::<u64>("access-token-ttl-seconds")
                .copied()
                .unwrap_or(900),
            refresh_token_ttl_seconds: matches
                .get_one::<u64>("refresh-token-ttl-seconds")
                .copied()
                .unwrap_or(86_400),
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .cloned()
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            verification_code_ttl_seconds: matches
                .get_one::<i64>("verification-code-ttl-seconds")
                .copied()
                .unwrap_or(600),
            reset_token_ttl_seconds: matches
                .get_one::<i64>("reset-token-ttl-seconds")
                .copied()
                .unwrap_or(600),
            oauth_flow_ttl_seconds: matches
                .get_one::<u64>("oauth-flow-ttl-seconds")
                .copied()
                .unwrap_or(600),
            outbox: OutboxOptions {
                poll_seconds: matches
                    .get_one::<u64>("email-outbox-poll-seconds")
                    .copied()
                    .unwrap_or(5),
                batch_size: matches
                    .get_one::<usize>("email-outbox-batch-size")
                    .copied()
                    .unwrap_or(10),
                max_attempts: matches
                    .get_one::<u32>("email-outbox-max-attempts")
                    .copied()
                    .unwrap_or(5),
                backoff_base_seconds: matches
                    .get_one::<u64>("email-outbox-backoff-base-seconds")
                    .copied()
                    .unwrap_or(5),
                backoff_max_seconds: matches
                    .get_one::<u64>("email-outbox-backoff-max-seconds")
                    .copied()
                    .unwrap_or(300),
            },
            providers,
        })
    }
}

/// A provider is configured when all three of its arguments are present;
/// a partial configuration is an error rather than a silently disabled login.
fn provider_settings(
    matches: &clap::ArgMatches,
    provider: Provider,
) -> Result<Option<ProviderSettings>> {
    let name = provider.as_str();
    let client_id = matches.get_one::<String>(&format!("{name}-client-id"));
    let client_secret = matches.get_one::<String>(&format!("{name}-client-secret"));
    let callback_url = matches.get_one::<String>(&format!("{name}-callback-url"));

    match (client_id, client_secret, callback_url) {
        (None, None, None) => Ok(None),
        (Some(client_id), Some(client_secret), Some(callback_url)) => Ok(Some(ProviderSettings {
            client_id: client_id.clone(),
            client_secret: SecretString::from(client_secret.as_str()),
            callback_url: callback_url.clone(),
        })),
        _ => Err(anyhow::anyhow!(
            "incomplete oauth configuration for {name}: client-id, client-secret, and callback-url must all be set"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Command;

    fn command() -> Command {
        with_args(Command::new("test"))
    }

    #[test]
    fn parses_token_secrets_and_defaults() -> Result<()> {
        let matches = command().get_matches_from(vec![
            "test",
            "--access-token-secret",
            "access",
            "--refresh-token-secret",
            "refresh",
        ]);
        let options = Options::parse(&matches)?;
        assert_eq!(options.access_token_ttl_seconds, 900);
        assert_eq!(options.refresh_token_ttl_seconds, 86_400);
        assert_eq!(options.verification_code_ttl_seconds, 600);
        assert_eq!(options.outbox.poll_seconds, 5);
        assert!(options.providers.is_empty());
        Ok(())
    }

    #[test]
    fn partial_provider_configuration_is_an_error() {
        let matches = command().get_matches_from(vec![
            "test",
            "--access-token-secret",
            "access",
            "--refresh-token-secret",
            "refresh",
            "--google-client-id",
            "id-only",
        ]);
        assert!(Options::parse(&matches).is_err());
    }

    #[test]
    fn complete_provider_configuration_is_collected() -> Result<()> {
        let matches = command().get_matches_from(vec![
            "test",
            "--access-token-secret",
            "access",
            "--refresh-token-secret",
            "refresh",
            "--google-client-id",
            "id",
            "--google-client-secret",
            "secret",
            "--google-callback-url",
            "https://api.shop.example.com/auth/google/callback",
        ]);
        let options = Options::parse(&matches)?;
        assert_eq!(options.providers.len(), 1);
        assert_eq!(options.providers[0].0, Provider::Google);
        Ok(())
    }
}
