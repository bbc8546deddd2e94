//! Identity provider seam and the explicit auth context handed to consumers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{error, instrument};
use url::Url;

use super::events::Identity;
use crate::APP_USER_AGENT;

const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current bearer token for a signed-in identity.
    async fn bearer_token(&self, identity: &Identity) -> Result<SecretString>;
}

/// Uses the token carried by the sign-in event as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventTokenProvider;

#[async_trait]
impl IdentityProvider for EventTokenProvider {
    async fn bearer_token(&self, identity: &Identity) -> Result<SecretString> {
        if identity.token.expose_secret().trim().is_empty() {
            return Err(anyhow!("identity {} has no token", identity.uid));
        }
        Ok(identity.token.clone())
    }
}

#[derive(Serialize)]
struct TokenExchangeRequest<'a> {
    uid: &'a str,
    token: &'a str,
}

#[derive(Deserialize)]
struct TokenExchangeResponse {
    token: String,
}

/// Exchanges the event token for a fresh one at the provider's token endpoint.
#[derive(Clone, Debug)]
pub struct RemoteTokenProvider {
    client: Client,
    endpoint: Url,
}

impl RemoteTokenProvider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build identity provider client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl IdentityProvider for RemoteTokenProvider {
    #[instrument(skip(self, identity), fields(uid = %identity.uid))]
    async fn bearer_token(&self, identity: &Identity) -> Result<SecretString> {
        let request = TokenExchangeRequest {
            uid: &identity.uid,
            token: identity.token.expose_secret(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .context("identity provider request failed")?;

        if response.status() != StatusCode::OK {
            error!("Token exchange failed: {}", response.status());
            return Err(anyhow!(
                "identity provider returned {}",
                response.status()
            ));
        }

        let body: TokenExchangeResponse = response
            .json()
            .await
            .context("invalid identity provider response")?;
        if body.token.trim().is_empty() {
            return Err(anyhow!("identity provider returned an empty token"));
        }
        Ok(SecretString::from(body.token))
    }
}

/// Identity state handed explicitly to the components that need it.
#[derive(Clone)]
pub struct AuthContext {
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

impl AuthContext {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            DEFAULT_PROVIDER_TIMEOUT
        } else {
            timeout
        };
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the provider for the identity's token, bounded by the timeout.
    ///
    /// # Errors
    /// Returns an error if the provider fails or does not answer in time.
    pub async fn bearer_token(&self, identity: &Identity) -> Result<SecretString> {
        timeout(self.timeout, self.provider.bearer_token(identity))
            .await
            .map_err(|_| anyhow!("identity provider timed out after {:?}", self.timeout))?
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new(Arc::new(EventTokenProvider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as HttpStatus, routing::post, Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    async fn spawn_provider(router: Router) -> Result<Url> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Url::parse(&format!("http://{addr}/token"))?)
    }

    struct SlowProvider;

    #[async_trait]
    impl IdentityProvider for SlowProvider {
        async fn bearer_token(&self, _identity: &Identity) -> Result<SecretString> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SecretString::from("late"))
        }
    }

    #[tokio::test]
    async fn event_provider_passes_token_through() -> Result<()> {
        let token = EventTokenProvider
            .bearer_token(&Identity::new("u1", "tok"))
            .await?;
        assert_eq!(token.expose_secret(), "tok");
        assert!(EventTokenProvider
            .bearer_token(&Identity::new("u1", " "))
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn remote_provider_exchanges_token() -> Result<()> {
        let router = Router::new().route(
            "/token",
            post(|Json(body): Json<Value>| async move {
                let uid = body["uid"].as_str().unwrap_or_default().to_string();
                Json(json!({ "token": format!("fresh-{uid}") }))
            }),
        );
        let provider = RemoteTokenProvider::new(spawn_provider(router).await?)?;
        let token = provider
            .bearer_token(&Identity::new("u1", "stale"))
            .await?;
        assert_eq!(token.expose_secret(), "fresh-u1");
        Ok(())
    }

    #[tokio::test]
    async fn remote_provider_surfaces_http_errors() -> Result<()> {
        let router = Router::new().route("/token", post(|| async { HttpStatus::UNAUTHORIZED }));
        let provider = RemoteTokenProvider::new(spawn_provider(router).await?)?;
        let result = provider.bearer_token(&Identity::new("u1", "stale")).await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn context_times_out_slow_provider() {
        let context = AuthContext::new(Arc::new(SlowProvider)).with_timeout(Duration::from_millis(50));
        let result = context.bearer_token(&Identity::new("u1", "tok")).await;
        assert!(result.is_err());
    }
}
