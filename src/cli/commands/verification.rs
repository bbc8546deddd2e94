use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

use crate::verification::{
    ConsumePolicy, IssuerConfig, DEFAULT_CODE_TTL_SECONDS, DEFAULT_SENDER,
};

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_issuer_args(command);
    let command = with_email_args(command);
    with_verifier_args(command)
}

fn with_issuer_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("code-ttl-seconds")
                .long("code-ttl-seconds")
                .help("Verification code lifetime in seconds")
                .env("CASEKEEPER_CODE_TTL_SECONDS")
                .default_value("1200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("persist-timeout-ms")
                .long("persist-timeout-ms")
                .help("Timeout for code store calls in milliseconds")
                .env("CASEKEEPER_PERSIST_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("code-sweep-interval-seconds")
                .long("code-sweep-interval-seconds")
                .help("How often expired codes are purged, in seconds")
                .env("CASEKEEPER_CODE_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("code-retention-seconds")
                .long("code-retention-seconds")
                .help("How long expired codes are kept before purging, in seconds")
                .env("CASEKEEPER_CODE_RETENTION_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_email_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-from")
                .long("email-from")
                .help("Sender address for verification emails")
                .env("CASEKEEPER_EMAIL_FROM")
                .default_value(DEFAULT_SENDER),
        )
        .arg(
            Arg::new("email-api-url")
                .long("email-api-url")
                .help("Email API endpoint; codes are only logged when unset")
                .env("CASEKEEPER_EMAIL_API_URL"),
        )
        .arg(
            Arg::new("email-api-key")
                .long("email-api-key")
                .help("Bearer key for the email API")
                .env("CASEKEEPER_EMAIL_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("delivery-timeout-ms")
                .long("delivery-timeout-ms")
                .help("Timeout for email delivery in milliseconds")
                .env("CASEKEEPER_DELIVERY_TIMEOUT_MS")
                .default_value("10000")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_verifier_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("verification-single-use")
                .long("verification-single-use")
                .help("Delete a code after its first successful verification")
                .env("CASEKEEPER_VERIFICATION_SINGLE_USE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verification-max-attempts")
                .long("verification-max-attempts")
                .help("Failed attempts allowed per code lifetime (0 disables limiting)")
                .env("CASEKEEPER_VERIFICATION_MAX_ATTEMPTS")
                .default_value("0")
                .value_parser(clap::value_parser!(u32)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub code_ttl_seconds: u64,
    pub persist_timeout_ms: u64,
    pub sweep_interval_seconds: u64,
    pub retention_seconds: u64,
    pub email_from: String,
    pub email_api_url: Option<Url>,
    pub email_api_key: Option<SecretString>,
    pub delivery_timeout_ms: u64,
    pub single_use: bool,
    pub max_attempts: u32,
}

impl Options {
    /// # Errors
    /// Returns an error if the email API URL is not a valid URL.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let u64_arg = |name: &str, default: u64| {
            matches.get_one::<u64>(name).copied().unwrap_or(default)
        };

        let email_api_url = matches
            .get_one::<String>("email-api-url")
            .map(String::as_str)
            .map(Url::parse)
            .transpose()
            .context("invalid --email-api-url")?;

        Ok(Self {
            code_ttl_seconds: u64_arg("code-ttl-seconds", DEFAULT_CODE_TTL_SECONDS),
            persist_timeout_ms: u64_arg("persist-timeout-ms", 5000),
            sweep_interval_seconds: u64_arg("code-sweep-interval-seconds", 300),
            retention_seconds: u64_arg("code-retention-seconds", 86_400),
            email_from: matches
                .get_one::<String>("email-from")
                .cloned()
                .unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            email_api_url,
            email_api_key: matches
                .get_one::<String>("email-api-key")
                .map(|key| SecretString::from(key.clone())),
            delivery_timeout_ms: u64_arg("delivery-timeout-ms", 10_000),
            single_use: matches.get_flag("verification-single-use"),
            max_attempts: matches
                .get_one::<u32>("verification-max-attempts")
                .copied()
                .unwrap_or(0),
        })
    }

    #[must_use]
    pub fn issuer_config(&self) -> IssuerConfig {
        IssuerConfig::new()
            .with_sender(self.email_from.clone())
            .with_code_ttl_seconds(self.code_ttl_seconds)
            .with_persist_timeout_ms(self.persist_timeout_ms)
            .with_delivery_timeout_ms(self.delivery_timeout_ms)
            .normalize()
    }

    #[must_use]
    pub fn consume_policy(&self) -> ConsumePolicy {
        if self.single_use {
            ConsumePolicy::SingleUse
        } else {
            ConsumePolicy::Repeatable
        }
    }

    #[must_use]
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}
