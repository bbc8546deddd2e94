//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{gate, session, verification};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if an argument cannot be interpreted.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .filter(|dsn| !dsn.trim().is_empty())
        .cloned();

    Ok(Action::Server(Args {
        port,
        dsn,
        gate: gate::Options::parse(matches)?,
        session: session::Options::parse(matches)?,
        verification: verification::Options::parse(matches)?,
    }))
}
