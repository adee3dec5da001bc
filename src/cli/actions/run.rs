use crate::cli::actions::{Action, server};
use anyhow::Result;

// Single dispatch point for CLI actions; new variants get a match arm here.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
    }
}
