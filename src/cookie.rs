//! The `idToken` session cookie: request-side parsing and `Set-Cookie` values.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use std::collections::HashMap;
use std::time::Duration;

pub const SESSION_COOKIE_NAME: &str = "idToken";

/// Seven days.
pub const SESSION_MAX_AGE_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Cookies presented on a single request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    /// Parse every `Cookie` header; the first occurrence of a name wins.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = HashMap::new();
        for header in headers.get_all(COOKIE) {
            let Ok(value) = header.to_str() else {
                continue;
            };
            for pair in value.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                cookies
                    .entry(key.to_string())
                    .or_insert_with(|| val.trim().to_string());
            }
        }
        Self { cookies }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// The session credential, if present and not blank.
    #[must_use]
    pub fn session_credential(&self) -> Option<&str> {
        self.get(SESSION_COOKIE_NAME)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    /// Apply a `Set-Cookie` value the way a browser would: an empty value or
    /// `Max-Age=0` evicts the cookie, anything else replaces it.
    pub fn apply_set_cookie(&mut self, set_cookie: &str) {
        let mut attributes = set_cookie.split(';');
        let Some((name, value)) = attributes
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(name, value)| (name.trim(), value.trim()))
        else {
            return;
        };

        let expired = attributes.any(|attribute| {
            attribute
                .trim()
                .split_once('=')
                .is_some_and(|(key, val)| key.eq_ignore_ascii_case("max-age") && val.trim() == "0")
        });

        if expired || value.is_empty() {
            self.cookies.remove(name);
        } else {
            self.insert(name, value);
        }
    }

    #[must_use]
    pub fn to_header_value(&self) -> Option<HeaderValue> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        pairs.sort();
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }
}

/// Build the `Set-Cookie` value that stores the session credential.
///
/// # Errors
/// Returns an error if the token contains bytes not allowed in a header.
pub fn session_cookie(
    token: &str,
    max_age: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = max_age.as_secs();
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build the `Set-Cookie` value that evicts the session credential.
///
/// # Errors
/// Never in practice; the value is static.
pub fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    session_cookie("", Duration::ZERO, secure)
}
