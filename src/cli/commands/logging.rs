use clap::{builder::ValueParser, Arg, ArgAction, Command};
use std::str::FromStr;
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Index is the `-v` count that selects the level.
const LEVELS: [Level; 5] = [
    Level::ERROR,
    Level::WARN,
    Level::INFO,
    Level::DEBUG,
    Level::TRACE,
];

/// Turn `CASEKEEPER_LOG_LEVEL` (a level name or a 0-4 count) into a `-v` count.
fn verbosity_from_env(value: &str) -> Result<u8, String> {
    let value = value.trim();
    if let Ok(count) = value.parse::<u8>() {
        return if usize::from(count) < LEVELS.len() {
            Ok(count)
        } else {
            Err(format!("log level count must be 0-{}", LEVELS.len() - 1))
        };
    }

    let level = Level::from_str(value).map_err(|_| format!("unknown log level `{value}`"))?;
    LEVELS
        .iter()
        .position(|candidate| *candidate == level)
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("unknown log level `{value}`"))
}

/// Level for a `-v` count. Zero leaves the default (errors only) to telemetry.
#[must_use]
pub fn level_for_verbosity(count: u8) -> Option<Level> {
    match count {
        0 => None,
        count => Some(
            LEVELS
                .get(usize::from(count))
                .copied()
                .unwrap_or(Level::TRACE),
        ),
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log more: -v warn, -vv info, -vvv debug, -vvvv trace (default: error)")
            .env("CASEKEEPER_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(ValueParser::from(verbosity_from_env)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_accepts_names_in_any_case() {
        assert_eq!(verbosity_from_env("error"), Ok(0));
        assert_eq!(verbosity_from_env("WARN"), Ok(1));
        assert_eq!(verbosity_from_env(" Info "), Ok(2));
        assert_eq!(verbosity_from_env("debug"), Ok(3));
        assert_eq!(verbosity_from_env("trace"), Ok(4));
    }

    #[test]
    fn env_accepts_counts() {
        assert_eq!(verbosity_from_env("0"), Ok(0));
        assert_eq!(verbosity_from_env("4"), Ok(4));
        assert!(verbosity_from_env("5").is_err());
        assert!(verbosity_from_env("loud").is_err());
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for_verbosity(0), None);
        assert_eq!(level_for_verbosity(1), Some(Level::WARN));
        assert_eq!(level_for_verbosity(2), Some(Level::INFO));
        assert_eq!(level_for_verbosity(3), Some(Level::DEBUG));
        assert_eq!(level_for_verbosity(4), Some(Level::TRACE));
        assert_eq!(level_for_verbosity(9), Some(Level::TRACE));
    }
}
