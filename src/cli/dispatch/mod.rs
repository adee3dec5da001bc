//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        access_token_secret: auth_opts.access_token_secret,
        refresh_token_secret: auth_opts.refresh_token_secret,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        frontend_base_url: auth_opts.frontend_base_url,
        verification_code_ttl_seconds: auth_opts.verification_code_ttl_seconds,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        oauth_flow_ttl_seconds: auth_opts.oauth_flow_ttl_seconds,
        email_outbox_poll_seconds: auth_opts.outbox.poll_seconds,
        email_outbox_batch_size: auth_opts.outbox.batch_size,
        email_outbox_max_attempts: auth_opts.outbox.max_attempts,
        email_outbox_backoff_base_seconds: auth_opts.outbox.backoff_base_seconds,
        email_outbox_backoff_max_seconds: auth_opts.outbox.backoff_max_seconds,
        providers: auth_opts.providers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_required() {
        temp_env::with_vars(
            [
                ("STOREFRONT_AUTH_DSN", None::<&str>),
                ("STOREFRONT_AUTH_ACCESS_TOKEN_SECRET", Some("access")),
                ("STOREFRONT_AUTH_REFRESH_TOKEN_SECRET", Some("refresh")),
            ],
            || {
                let command = crate::cli::commands::new();
                let result = command.try_get_matches_from(vec!["storefront-auth"]);
                assert!(result.is_err());
            },
        );
    }

    #[test]
    fn server_action_from_full_args() {
        temp_env::with_vars(
            [
                (
                    "STOREFRONT_AUTH_DSN",
                    Some("postgres://user@localhost:5432/storefront"),
                ),
                ("STOREFRONT_AUTH_ACCESS_TOKEN_SECRET", Some("access")),
                ("STOREFRONT_AUTH_REFRESH_TOKEN_SECRET", Some("refresh")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["storefront-auth"]);
                let action = handler(&matches).expect("server action");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.access_token_ttl_seconds, 900);
                assert!(args.providers.is_empty());
            },
        );
    }
}
