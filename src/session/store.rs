//! Where the session credential gets written.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::cookie::{clear_session_cookie, session_cookie};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store `value` for `max_age`. An empty value with a zero lifetime evicts.
    async fn write(&self, value: &str, max_age: Duration) -> Result<()>;
}

/// Collects `Set-Cookie` headers for the response being built.
#[derive(Debug, Default)]
pub struct ResponseCookies {
    secure: bool,
    cookies: Mutex<Vec<HeaderValue>>,
}

impl ResponseCookies {
    #[must_use]
    pub fn new(secure: bool) -> Self {
        Self {
            secure,
            cookies: Mutex::new(Vec::new()),
        }
    }

    /// Drain the collected cookies into response headers.
    #[must_use]
    pub fn take_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let cookies = std::mem::take(
            &mut *self.cookies.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for cookie in cookies {
            headers.append(SET_COOKIE, cookie);
        }
        headers
    }
}

#[async_trait]
impl CredentialStore for ResponseCookies {
    async fn write(&self, value: &str, max_age: Duration) -> Result<()> {
        let cookie = if value.is_empty() || max_age.is_zero() {
            clear_session_cookie(self.secure)
        } else {
            session_cookie(value, max_age, self.secure)
        }
        .context("session credential is not a valid cookie value")?;

        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cookie);
        Ok(())
    }
}
