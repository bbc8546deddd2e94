//! Second-factor verification codes.
//!
//! [`CodeIssuer`] generates a 6-digit code, upserts it as the single live
//! record for the user and emails it. [`CodeVerifier`] compares a candidate
//! against that record. Outcomes are `Accepted`, `Rejected` with a reason
//! (`expired`, `mismatch`, `not_found`) or `Limited` when a rate limiter is
//! configured and the user has too many recent mismatches.
//!
//! All timestamps are epoch milliseconds taken from a [`Clock`].

mod delivery;
mod issuer;
mod rate_limit;
mod store;
mod verifier;

pub use delivery::{
    CodeDelivery, EmailMessage, HttpEmailSender, LogEmailSender, VERIFICATION_SUBJECT,
};
pub use issuer::{
    CodeGenerator, CodeIssuer, IssueError, IssuedCode, IssuerConfig, RandomCodeGenerator,
    DEFAULT_CODE_TTL_SECONDS, DEFAULT_SENDER,
};
pub use rate_limit::{AttemptLimiter, NoopRateLimiter, RateLimitDecision, RateLimiter};
pub use store::{
    spawn_expiry_sweeper, CodeStore, MemoryCodeStore, PgCodeStore, VerificationRecord,
};
pub use verifier::{CodeVerifier, ConsumePolicy, RejectReason, VerifyError, VerifyOutcome};

pub use crate::clock::Clock;
