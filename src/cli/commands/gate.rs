use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use std::sync::Arc;

use crate::{
    clock::Clock,
    gate::{ExemptionSet, TokenGate, ValidationMode},
};

pub const ARG_GATE_VALIDATION: &str = "gate-validation";
pub const ARG_GATE_LEEWAY_SECONDS: &str = "gate-leeway-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GATE_VALIDATION)
                .long(ARG_GATE_VALIDATION)
                .help("How the gate checks the idToken cookie: presence or claims")
                .long_help(
                    "How the gate checks the idToken cookie. `presence` lets any non-blank \
                     cookie through; `claims` also decodes the JWT payload and rejects expired \
                     or malformed tokens. Neither checks signatures.",
                )
                .env("CASEKEEPER_GATE_VALIDATION")
                .default_value("presence")
                .value_parser(["presence", "claims"]),
        )
        .arg(
            Arg::new(ARG_GATE_LEEWAY_SECONDS)
                .long(ARG_GATE_LEEWAY_SECONDS)
                .help("Clock skew allowed on the exp claim, in seconds")
                .env("CASEKEEPER_GATE_LEEWAY_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub mode: ValidationMode,
    pub leeway_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if the validation mode is unknown.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let mode = matches
            .get_one::<String>(ARG_GATE_VALIDATION)
            .map_or(Ok(ValidationMode::default()), |mode| {
                mode.parse::<ValidationMode>()
            })
            .map_err(|err| anyhow!(err))?;
        let leeway_seconds = matches
            .get_one::<i64>(ARG_GATE_LEEWAY_SECONDS)
            .copied()
            .unwrap_or(30);

        Ok(Self {
            mode,
            leeway_seconds,
        })
    }

    #[must_use]
    pub fn gate(&self, clock: Arc<dyn Clock>) -> TokenGate {
        TokenGate::new(
            ExemptionSet::default(),
            self.mode.validator(clock, self.leeway_seconds),
        )
    }
}
