use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Accepts either a count (0-5) or a level name (error..trace).
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        match level.parse::<u8>() {
            Ok(parsed) if parsed <= 5 => Ok(parsed),
            _ => match level.to_lowercase().as_str() {
                "error" => Ok(0),
                "warn" => Ok(1),
                "info" => Ok(2),
                "debug" => Ok(3),
                "trace" => Ok(4),
                _ => Err("invalid log level".to_string()),
            },
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("STOREFRONT_AUTH_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_levels_map_to_counts() {
        let parser = validator_log_level();
        let command = Command::new("test").arg(
            Arg::new("level")
                .long("level")
                .value_parser(parser)
                .action(clap::ArgAction::Set),
        );
        let matches = command.get_matches_from(vec!["test", "--level", "debug"]);
        assert_eq!(matches.get_one::<u8>("level").copied(), Some(3));
    }
}
