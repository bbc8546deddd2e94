//! Pluggable credential checks run by the gate once a credential is present.
//!
//! Neither validator verifies signatures. `ClaimsExpiryValidator` only reads the
//! `exp` claim of a JWT-shaped credential so stale cookies are bounced early;
//! the real check belongs to whoever serves the allowed request.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::Deserialize;
use std::{fmt, str::FromStr, sync::Arc};

use crate::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Expired,
    Invalid,
}

pub trait TokenValidator: Send + Sync {
    fn validate(&self, credential: &str) -> TokenStatus;
}

/// Accept any non-blank credential.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresenceValidator;

impl TokenValidator for PresenceValidator {
    fn validate(&self, credential: &str) -> TokenStatus {
        if credential.trim().is_empty() {
            TokenStatus::Invalid
        } else {
            TokenStatus::Valid
        }
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

pub struct ClaimsExpiryValidator {
    clock: Arc<dyn Clock>,
    leeway_seconds: i64,
}

impl ClaimsExpiryValidator {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            leeway_seconds: 30,
        }
    }

    #[must_use]
    pub fn with_leeway_seconds(mut self, seconds: i64) -> Self {
        self.leeway_seconds = seconds.max(0);
        self
    }
}

impl TokenValidator for ClaimsExpiryValidator {
    fn validate(&self, credential: &str) -> TokenStatus {
        let mut segments = credential.trim().split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return TokenStatus::Invalid;
        };

        let Ok(bytes) = Base64UrlUnpadded::decode_vec(payload) else {
            return TokenStatus::Invalid;
        };
        let Ok(Claims { exp: Some(exp) }) = serde_json::from_slice::<Claims>(&bytes) else {
            return TokenStatus::Invalid;
        };

        let now_seconds = self.clock.now_millis() / 1000;
        if exp.saturating_add(self.leeway_seconds) < now_seconds {
            TokenStatus::Expired
        } else {
            TokenStatus::Valid
        }
    }
}

/// Validator selection exposed on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValidationMode {
    #[default]
    Presence,
    Claims,
}

impl ValidationMode {
    /// `leeway_seconds` only applies to [`ValidationMode::Claims`].
    #[must_use]
    pub fn validator(
        self,
        clock: Arc<dyn Clock>,
        leeway_seconds: i64,
    ) -> Arc<dyn TokenValidator> {
        match self {
            Self::Presence => Arc::new(PresenceValidator),
            Self::Claims => {
                Arc::new(ClaimsExpiryValidator::new(clock).with_leeway_seconds(leeway_seconds))
            }
        }
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "presence" => Ok(Self::Presence),
            "claims" => Ok(Self::Claims),
            other => Err(format!("unknown gate validation mode: {other}")),
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence => write!(f, "presence"),
            Self::Claims => write!(f, "claims"),
        }
    }
}
