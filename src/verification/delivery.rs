//! Out-of-band delivery of verification codes.
//!
//! The code travels in cleartext inside the message body. `LogEmailSender`
//! only logs (local dev); `HttpEmailSender` posts the message to an email API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::APP_USER_AGENT;

pub const VERIFICATION_SUBJECT: &str = "Your 2FA Code";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl EmailMessage {
    /// The second-factor email: fixed subject, code and expiry notice in the body.
    #[must_use]
    pub fn verification_code(from: &str, to: &str, code: &str, expires_in_minutes: u64) -> Self {
        let unit = if expires_in_minutes == 1 {
            "minute"
        } else {
            "minutes"
        };
        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: VERIFICATION_SUBJECT.to_string(),
            html: format!(
                "<p>Your verification code is <strong>{code}</strong>.</p>\
                 <p>This code expires in {expires_in_minutes} {unit}.</p>"
            ),
        }
    }
}

#[async_trait]
pub trait CodeDelivery: Send + Sync {
    /// Deliver a message or return an error so the caller can report it.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl CodeDelivery for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to,
            subject = %message.subject,
            "email send stub"
        );
        debug!(html = %message.html, "email body");
        Ok(())
    }
}

/// Posts messages as JSON to an email API endpoint.
#[derive(Clone, Debug)]
pub struct HttpEmailSender {
    client: Client,
    endpoint: Url,
    api_key: Option<SecretString>,
}

impl HttpEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: Url, api_key: Option<SecretString>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build email client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl CodeDelivery for HttpEmailSender {
    #[instrument(skip_all, fields(to_email = %message.to))]
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let mut request = self.client.post(self.endpoint.clone()).json(message);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("email API request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("email API returned {status}"));
        }
        Ok(())
    }
}
