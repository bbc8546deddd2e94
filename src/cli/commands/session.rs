use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::{sync::Arc, time::Duration};
use url::Url;

use crate::cookie::SESSION_MAX_AGE_SECONDS;
use crate::session::{
    AuthContext, EventTokenProvider, IdentityProvider, RemoteTokenProvider, SessionConfig,
};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session cookie TTL in seconds")
                .env("CASEKEEPER_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("session-cookie-secure")
                .long("session-cookie-secure")
                .help("Mark the idToken cookie Secure (HTTPS only)")
                .env("CASEKEEPER_SESSION_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("identity-token-url")
                .long("identity-token-url")
                .help("Identity provider endpoint that exchanges sign-in tokens")
                .long_help(
                    "Identity provider endpoint that exchanges the token reported on sign-in \
                     for the bearer token stored in the cookie. Without it the reported token \
                     is stored as is.",
                )
                .env("CASEKEEPER_IDENTITY_TOKEN_URL"),
        )
        .arg(
            Arg::new("identity-timeout-ms")
                .long("identity-timeout-ms")
                .help("Timeout for identity provider calls in milliseconds")
                .env("CASEKEEPER_IDENTITY_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub ttl_seconds: u64,
    pub cookie_secure: bool,
    pub identity_token_url: Option<Url>,
    pub identity_timeout_ms: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if the identity provider URL is not a valid URL.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let identity_token_url = matches
            .get_one::<String>("identity-token-url")
            .map(String::as_str)
            .map(Url::parse)
            .transpose()
            .context("invalid --identity-token-url")?;

        Ok(Self {
            ttl_seconds: matches
                .get_one::<u64>("session-ttl-seconds")
                .copied()
                .filter(|ttl| *ttl > 0)
                .unwrap_or(SESSION_MAX_AGE_SECONDS),
            cookie_secure: matches.get_flag("session-cookie-secure"),
            identity_token_url,
            identity_timeout_ms: matches
                .get_one::<u64>("identity-timeout-ms")
                .copied()
                .unwrap_or(5000),
        })
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .with_ttl_seconds(self.ttl_seconds)
            .with_cookie_secure(self.cookie_secure)
    }

    /// # Errors
    /// Returns an error if the remote provider client cannot be built.
    pub fn auth_context(&self) -> Result<AuthContext> {
        let provider: Arc<dyn IdentityProvider> = match &self.identity_token_url {
            Some(url) => Arc::new(RemoteTokenProvider::new(url.clone())?),
            None => Arc::new(EventTokenProvider),
        };
        Ok(AuthContext::new(provider)
            .with_timeout(Duration::from_millis(self.identity_timeout_ms)))
    }
}
