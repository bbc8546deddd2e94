//! Mirror identity-provider state into the session credential.
//!
//! A [`SessionSynchronizer`] is built from an explicit [`AuthContext`] and a
//! [`CredentialStore`]. Attaching it to an [`AuthEventSource`] yields a
//! [`SyncScope`] that owns exactly one subscription; dropping the scope
//! releases the subscription, so no stale scope keeps receiving events.
//!
//! - `SignedIn`: ask the provider for the bearer token and store it for
//!   [`SESSION_MAX_AGE_SECONDS`](crate::cookie::SESSION_MAX_AGE_SECONDS).
//! - `SignedOut`: store an empty value with a zero lifetime.
//!
//! Provider and store failures are returned with the event that caused them
//! so the caller can retry it.

mod events;
mod provider;
mod store;

pub use events::{AuthEvent, AuthEventHub, AuthEventSource, AuthSubscription, Identity};
pub use provider::{AuthContext, EventTokenProvider, IdentityProvider, RemoteTokenProvider};
pub use store::{CredentialStore, ResponseCookies};

use secrecy::ExposeSecret;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::cookie::SESSION_MAX_AGE_SECONDS;

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    ttl: Duration,
    cookie_secure: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl: Duration::from_secs(SESSION_MAX_AGE_SECONDS),
            cookie_secure: false,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("identity provider failure: {0}")]
    Provider(String),
    #[error("credential store failure: {0}")]
    Store(String),
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider_failure",
            Self::Store(_) => "store_failure",
        }
    }
}

/// A failed event, handed back for retry.
#[derive(Debug, Error)]
#[error("failed to apply auth event: {error}")]
pub struct SyncFailure {
    pub event: AuthEvent,
    #[source]
    pub error: SyncError,
}

/// What a single event did to the credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialWrite {
    Set { max_age_seconds: u64 },
    Cleared,
}

pub struct SessionSynchronizer {
    context: AuthContext,
    store: Arc<dyn CredentialStore>,
    ttl: Duration,
}

impl SessionSynchronizer {
    #[must_use]
    pub fn new(context: AuthContext, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            context,
            store,
            ttl: Duration::from_secs(SESSION_MAX_AGE_SECONDS),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Apply one event to the credential store.
    ///
    /// # Errors
    /// Returns [`SyncError::Provider`] when the token cannot be fetched and
    /// [`SyncError::Store`] when the credential cannot be written.
    #[instrument(skip_all)]
    pub async fn apply(&self, event: &AuthEvent) -> Result<CredentialWrite, SyncError> {
        match event {
            AuthEvent::SignedIn(identity) => {
                let token = self.context.bearer_token(identity).await.map_err(|err| {
                    warn!(uid = %identity.uid, "failed to fetch bearer token: {err:#}");
                    SyncError::Provider(format!("{err:#}"))
                })?;
                self.store
                    .write(token.expose_secret(), self.ttl)
                    .await
                    .map_err(|err| SyncError::Store(format!("{err:#}")))?;
                info!(uid = %identity.uid, "session credential written");
                Ok(CredentialWrite::Set {
                    max_age_seconds: self.ttl.as_secs(),
                })
            }
            AuthEvent::SignedOut => {
                self.store
                    .write("", Duration::ZERO)
                    .await
                    .map_err(|err| SyncError::Store(format!("{err:#}")))?;
                info!("session credential cleared");
                Ok(CredentialWrite::Cleared)
            }
        }
    }

    /// Subscribe to `source` for the lifetime of the returned scope.
    #[must_use]
    pub fn attach(self, source: &dyn AuthEventSource) -> SyncScope {
        SyncScope {
            subscription: source.subscribe(),
            synchronizer: self,
        }
    }
}

/// One mounted subscription driving a [`SessionSynchronizer`].
pub struct SyncScope {
    synchronizer: SessionSynchronizer,
    subscription: AuthSubscription,
}

impl SyncScope {
    /// Wait for the next event and apply it. `None` when the source is gone.
    pub async fn process_next(&mut self) -> Option<Result<CredentialWrite, SyncFailure>> {
        let event = self.subscription.next().await?;
        Some(
            self.synchronizer
                .apply(&event)
                .await
                .map_err(|error| SyncFailure { event, error }),
        )
    }

    /// Re-apply an event that failed earlier.
    ///
    /// # Errors
    /// Same as [`SessionSynchronizer::apply`].
    pub async fn retry(&self, failure: SyncFailure) -> Result<CredentialWrite, SyncFailure> {
        let SyncFailure { event, .. } = failure;
        self.synchronizer
            .apply(&event)
            .await
            .map_err(|error| SyncFailure { event, error })
    }

    /// Apply events until the source closes or an event fails.
    ///
    /// # Errors
    /// Returns the first failed event; the subscription is released with it.
    pub async fn run(mut self) -> Result<(), SyncFailure> {
        while let Some(result) = self.process_next().await {
            result?;
        }
        Ok(())
    }

    /// Tear the scope down and unregister its subscription.
    pub fn release(self) {}
}
