//! # Casekeeper (session gate & second factor)
//!
//! `casekeeper` is the access-control core of the case-management front end.
//! It decides per request whether a caller may proceed, mirrors identity
//! provider state into the `idToken` session cookie, and issues time-boxed
//! one-time codes for a second factor.
//!
//! ## Gate
//!
//! Every request passes through [`gate::TokenGate`]. Paths under the fixed
//! exemption prefixes (`login`, `api`, `_next/static`, `_next/image`,
//! `favicon.ico`) are always allowed. Anything else requires a non-empty
//! `idToken` cookie, otherwise the caller is sent to `/login` with a `307`.
//!
//! The gate is advisory: the default validator only checks presence. Handlers
//! behind the gate must re-verify the credential before trusting it.
//!
//! ## Session synchronization
//!
//! [`session::SessionSynchronizer`] consumes `SignedIn`/`SignedOut` events from
//! the identity provider and writes or clears the credential. Failures are
//! returned to the caller, never dropped.
//!
//! ## Verification codes
//!
//! [`verification::CodeIssuer`] upserts one 6-digit code per user, valid for
//! 20 minutes, and emails it. [`verification::CodeVerifier`] checks candidates.

pub mod api;
pub mod cli;
pub mod clock;
pub mod cookie;
pub mod gate;
pub mod session;
pub mod verification;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
