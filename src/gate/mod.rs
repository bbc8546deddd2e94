//! Per-request session gate.
//!
//! The gate inspects the request path and the `idToken` cookie and either lets
//! the request through or answers `307 Temporary Redirect` to `/login`, which
//! keeps the original method. It never touches the cookie jar and never fails.
//!
//! Access control here is advisory. With the default [`PresenceValidator`] any
//! non-blank cookie passes; handlers behind the gate must re-verify.

mod validator;

pub use validator::{
    ClaimsExpiryValidator, PresenceValidator, TokenStatus, TokenValidator, ValidationMode,
};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::cookie::CookieJar;

pub const LOGIN_PATH: &str = "/login";

/// Path prefixes that bypass the gate, matched against the path without its
/// leading `/`.
pub const DEFAULT_EXEMPTIONS: [&str; 5] = ["login", "api", "_next/static", "_next/image", "favicon.ico"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExemptionSet {
    prefixes: Vec<String>,
}

impl ExemptionSet {
    #[must_use]
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|prefix: &String| !prefix.is_empty())
                .collect(),
        }
    }

    /// Literal, case-sensitive prefix match.
    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl Default for ExemptionSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXEMPTIONS)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect {
        target: &'static str,
        preserve_method: bool,
    },
}

impl GateDecision {
    const fn to_login() -> Self {
        Self::Redirect {
            target: LOGIN_PATH,
            preserve_method: true,
        }
    }
}

#[derive(Clone)]
pub struct TokenGate {
    exemptions: ExemptionSet,
    validator: Arc<dyn TokenValidator>,
}

impl TokenGate {
    #[must_use]
    pub fn new(exemptions: ExemptionSet, validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            exemptions,
            validator,
        }
    }

    #[must_use]
    pub fn exemptions(&self) -> &ExemptionSet {
        &self.exemptions
    }

    #[must_use]
    pub fn intercept(&self, path: &str, jar: &CookieJar) -> GateDecision {
        if self.exemptions.is_exempt(path) {
            return GateDecision::Allow;
        }

        let Some(credential) = jar.session_credential() else {
            debug!(path, "no session credential, redirecting to login");
            return GateDecision::to_login();
        };

        match self.validator.validate(credential) {
            TokenStatus::Valid => GateDecision::Allow,
            status => {
                debug!(path, ?status, "session credential rejected, redirecting to login");
                GateDecision::to_login()
            }
        }
    }
}

impl Default for TokenGate {
    fn default() -> Self {
        Self::new(ExemptionSet::default(), Arc::new(PresenceValidator))
    }
}

/// axum middleware running [`TokenGate::intercept`] for every request.
pub async fn gate_middleware(
    State(gate): State<TokenGate>,
    request: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    match gate.intercept(request.uri().path(), &jar) {
        GateDecision::Allow => next.run(request).await,
        // Redirect::temporary is a 307, so the method and body are replayed.
        GateDecision::Redirect { target, .. } => Redirect::temporary(target).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::cookie::SESSION_COOKIE_NAME;

    const GATED: [&str; 6] = ["/", "/dashboard", "/clients/42", "/Login", "/static/app.js", "/_next/data"];
    const EXEMPT: [&str; 7] = [
        "/login",
        "/login/reset",
        "/api/verification/send",
        "/_next/static/chunk.js",
        "/_next/image?url=x",
        "/favicon.ico",
        "api",
    ];

    fn jar_with(value: Option<&str>) -> CookieJar {
        let mut jar = CookieJar::default();
        if let Some(value) = value {
            jar.insert(SESSION_COOKIE_NAME, value);
        }
        jar
    }

    #[test]
    fn gated_paths_redirect_without_credential() {
        let gate = TokenGate::default();
        for path in GATED {
            for cookie in [None, Some(""), Some("   ")] {
                assert_eq!(
                    gate.intercept(path, &jar_with(cookie)),
                    GateDecision::Redirect {
                        target: "/login",
                        preserve_method: true
                    },
                    "path {path} cookie {cookie:?}"
                );
            }
        }
    }

    #[test]
    fn gated_paths_allow_with_credential() {
        let gate = TokenGate::default();
        for path in GATED {
            assert_eq!(
                gate.intercept(path, &jar_with(Some("token"))),
                GateDecision::Allow
            );
        }
    }

    #[test]
    fn exempt_paths_always_allow() {
        let gate = TokenGate::default();
        for path in EXEMPT {
            for cookie in [None, Some(""), Some("token")] {
                assert_eq!(
                    gate.intercept(path, &jar_with(cookie)),
                    GateDecision::Allow,
                    "path {path}"
                );
            }
        }
    }

    #[test]
    fn exemption_is_a_literal_prefix() {
        let exemptions = ExemptionSet::default();
        assert!(exemptions.is_exempt("/apiary"));
        assert!(exemptions.is_exempt("/loginhelp"));
        assert!(!exemptions.is_exempt("/API"));
        assert!(!exemptions.is_exempt("/v1/api"));
    }

    #[test]
    fn empty_prefixes_are_ignored() {
        let exemptions = ExemptionSet::new(["", "public"]);
        assert!(!exemptions.is_exempt("/dashboard"));
        assert!(exemptions.is_exempt("/public/logo.png"));
    }

    #[test]
    fn expired_claims_redirect() {
        let validator = ClaimsExpiryValidator::new(Arc::new(FixedClock::new(10_000_000)));
        let gate = TokenGate::new(ExemptionSet::default(), Arc::new(validator));
        // {"exp":1}
        let token = "eyJhbGciOiJub25lIn0.eyJleHAiOjF9.c2ln";
        assert!(matches!(
            gate.intercept("/dashboard", &jar_with(Some(token))),
            GateDecision::Redirect { .. }
        ));
        assert_eq!(
            gate.intercept("/login", &jar_with(Some(token))),
            GateDecision::Allow
        );
    }
}
