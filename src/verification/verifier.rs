use serde::Serialize;
use std::{str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};

use super::rate_limit::{NoopRateLimiter, RateLimitDecision, RateLimiter};
use super::store::CodeStore;
use crate::clock::{Clock, SystemClock};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Expired,
    Mismatch,
    NotFound,
}

impl RejectReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Mismatch => "mismatch",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Accepted,
    Rejected(RejectReason),
    /// Too many recent mismatches; the store was not consulted.
    Limited,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl VerifyError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Persistence(_) => "persistence_failure",
        }
    }
}

/// What happens to a record once its code is accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsumePolicy {
    /// The code keeps verifying until it expires or is replaced.
    #[default]
    Repeatable,
    /// The record is deleted on the first successful verification.
    SingleUse,
}

impl FromStr for ConsumePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repeatable" => Ok(Self::Repeatable),
            "single-use" | "single_use" => Ok(Self::SingleUse),
            other => Err(format!("unknown consume policy: {other}")),
        }
    }
}

pub struct CodeVerifier {
    store: Arc<dyn CodeStore>,
    clock: Arc<dyn Clock>,
    limiter: Arc<dyn RateLimiter>,
    policy: ConsumePolicy,
    store_timeout: Duration,
}

impl CodeVerifier {
    #[must_use]
    pub fn new(store: Arc<dyn CodeStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            limiter: Arc::new(NoopRateLimiter),
            policy: ConsumePolicy::default(),
            store_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ConsumePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        if !store_timeout.is_zero() {
            self.store_timeout = store_timeout;
        }
        self
    }

    #[must_use]
    pub fn policy(&self) -> ConsumePolicy {
        self.policy
    }

    /// Verify against the current clock.
    ///
    /// # Errors
    /// Returns [`VerifyError::Persistence`] if the store cannot be read.
    pub async fn verify(&self, user_id: &str, code: &str) -> Result<VerifyOutcome, VerifyError> {
        self.verify_at(user_id, code, self.clock.now_millis()).await
    }

    /// Check `code` against the stored record for `user_id` at `now_ms`.
    ///
    /// A record with `now_ms > expires_at` is `Expired`, even when the code
    /// matches. Only mismatches count towards the rate limit.
    ///
    /// # Errors
    /// Returns [`VerifyError::Persistence`] if the store cannot be read.
    #[instrument(skip(self, code))]
    pub async fn verify_at(
        &self,
        user_id: &str,
        code: &str,
        now_ms: i64,
    ) -> Result<VerifyOutcome, VerifyError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Ok(VerifyOutcome::Rejected(RejectReason::NotFound));
        }

        if self.limiter.check(user_id, now_ms) == RateLimitDecision::Limited {
            warn!("verification rate limited");
            return Ok(VerifyOutcome::Limited);
        }

        let record = match timeout(self.store_timeout, self.store.load(user_id)).await {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => {
                error!("Failed to load verification code: {err:#}");
                return Err(VerifyError::Persistence(format!("{err:#}")));
            }
            Err(_) => {
                error!("Loading verification code timed out");
                return Err(VerifyError::Persistence("store timed out".to_string()));
            }
        };

        let Some(record) = record else {
            debug!("no verification code on record");
            return Ok(VerifyOutcome::Rejected(RejectReason::NotFound));
        };

        if now_ms > record.expires_at {
            return Ok(VerifyOutcome::Rejected(RejectReason::Expired));
        }

        if !constant_time_eq(record.code.as_bytes(), code.trim().as_bytes()) {
            self.limiter.record_failure(user_id, now_ms);
            return Ok(VerifyOutcome::Rejected(RejectReason::Mismatch));
        }

        self.limiter.reset(user_id);

        if self.policy == ConsumePolicy::SingleUse {
            match timeout(self.store_timeout, self.store.delete(user_id)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    error!("Failed to consume verification code: {err:#}");
                    return Err(VerifyError::Persistence(format!("{err:#}")));
                }
                Err(_) => {
                    error!("Consuming verification code timed out");
                    return Err(VerifyError::Persistence("store timed out".to_string()));
                }
            }
        }

        Ok(VerifyOutcome::Accepted)
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::verification::rate_limit::AttemptLimiter;
    use crate::verification::store::{MemoryCodeStore, VerificationRecord};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    async fn seeded_store() -> Result<Arc<MemoryCodeStore>> {
        let store = Arc::new(MemoryCodeStore::new());
        store
            .upsert(
                "u1",
                &VerificationRecord {
                    code: "482913".to_string(),
                    expires_at: 1_200_000,
                    created_at: 0,
                },
            )
            .await?;
        Ok(store)
    }

    struct BrokenStore;

    #[async_trait]
    impl CodeStore for BrokenStore {
        async fn upsert(&self, _user_id: &str, _record: &VerificationRecord) -> Result<()> {
            Err(anyhow!("down"))
        }
        async fn load(&self, _user_id: &str) -> Result<Option<VerificationRecord>> {
            Err(anyhow!("down"))
        }
        async fn delete(&self, _user_id: &str) -> Result<bool> {
            Err(anyhow!("down"))
        }
        async fn purge_expired(&self, _cutoff_ms: i64) -> Result<u64> {
            Err(anyhow!("down"))
        }
    }

    #[tokio::test]
    async fn verify_outcomes() -> Result<()> {
        let verifier = CodeVerifier::new(seeded_store().await?);

        assert_eq!(
            verifier.verify_at("u1", "482913", 1_000_000).await?,
            VerifyOutcome::Accepted
        );
        assert_eq!(
            verifier.verify_at("u1", "482913", 1_300_000).await?,
            VerifyOutcome::Rejected(RejectReason::Expired)
        );
        assert_eq!(
            verifier.verify_at("u1", "000000", 500_000).await?,
            VerifyOutcome::Rejected(RejectReason::Mismatch)
        );
        assert_eq!(
            verifier.verify_at("u2", "482913", 500_000).await?,
            VerifyOutcome::Rejected(RejectReason::NotFound)
        );
        Ok(())
    }

    #[tokio::test]
    async fn expires_at_is_inclusive() -> Result<()> {
        let verifier = CodeVerifier::new(seeded_store().await?);
        assert_eq!(
            verifier.verify_at("u1", "482913", 1_200_000).await?,
            VerifyOutcome::Accepted
        );
        assert_eq!(
            verifier.verify_at("u1", "482913", 1_200_001).await?,
            VerifyOutcome::Rejected(RejectReason::Expired)
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_wins_over_mismatch() -> Result<()> {
        let verifier = CodeVerifier::new(seeded_store().await?);
        assert_eq!(
            verifier.verify_at("u1", "000000", 2_000_000).await?,
            VerifyOutcome::Rejected(RejectReason::Expired)
        );
        Ok(())
    }

    #[tokio::test]
    async fn repeatable_by_default() -> Result<()> {
        let store = seeded_store().await?;
        let verifier = CodeVerifier::new(store.clone());
        assert_eq!(verifier.policy(), ConsumePolicy::Repeatable);
        for _ in 0..3 {
            assert_eq!(
                verifier.verify_at("u1", "482913", 10).await?,
                VerifyOutcome::Accepted
            );
        }
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn single_use_consumes_record() -> Result<()> {
        let store = seeded_store().await?;
        let verifier = CodeVerifier::new(store.clone()).with_policy(ConsumePolicy::SingleUse);
        assert_eq!(
            verifier.verify_at("u1", "482913", 10).await?,
            VerifyOutcome::Accepted
        );
        assert_eq!(
            verifier.verify_at("u1", "482913", 20).await?,
            VerifyOutcome::Rejected(RejectReason::NotFound)
        );
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn verify_uses_clock() -> Result<()> {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let verifier = CodeVerifier::new(seeded_store().await?).with_clock(clock.clone());
        assert_eq!(verifier.verify("u1", "482913").await?, VerifyOutcome::Accepted);
        clock.advance(300_000);
        assert_eq!(
            verifier.verify("u1", "482913").await?,
            VerifyOutcome::Rejected(RejectReason::Expired)
        );
        Ok(())
    }

    #[tokio::test]
    async fn limiter_counts_mismatches_only() -> Result<()> {
        let verifier = CodeVerifier::new(seeded_store().await?)
            .with_rate_limiter(Arc::new(AttemptLimiter::new(2, 60_000)));

        for _ in 0..5 {
            assert_eq!(
                verifier.verify_at("u2", "000000", 10).await?,
                VerifyOutcome::Rejected(RejectReason::NotFound)
            );
        }
        for at in [10, 20] {
            assert_eq!(
                verifier.verify_at("u1", "000000", at).await?,
                VerifyOutcome::Rejected(RejectReason::Mismatch)
            );
        }
        assert_eq!(
            verifier.verify_at("u1", "482913", 30).await?,
            VerifyOutcome::Limited
        );
        assert_eq!(
            verifier.verify_at("u1", "482913", 70_000).await?,
            VerifyOutcome::Accepted
        );
        Ok(())
    }

    /// Answers `load` with a live record after `load_delay`; `delete` never answers.
    struct StalledStore {
        load_delay: Duration,
    }

    #[async_trait]
    impl CodeStore for StalledStore {
        async fn upsert(&self, _user_id: &str, _record: &VerificationRecord) -> Result<()> {
            Ok(())
        }
        async fn load(&self, _user_id: &str) -> Result<Option<VerificationRecord>> {
            tokio::time::sleep(self.load_delay).await;
            Ok(Some(VerificationRecord {
                code: "482913".to_string(),
                expires_at: 1_200_000,
                created_at: 0,
            }))
        }
        async fn delete(&self, _user_id: &str) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
        async fn purge_expired(&self, _cutoff_ms: i64) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn load_timeout_is_a_persistence_failure() {
        let verifier = CodeVerifier::new(Arc::new(StalledStore {
            load_delay: Duration::from_secs(60),
        }))
        .with_store_timeout(Duration::from_millis(20));
        let result = verifier.verify_at("u1", "482913", 0).await;
        assert!(matches!(result, Err(VerifyError::Persistence(_))));
    }

    #[tokio::test]
    async fn consume_timeout_is_a_persistence_failure() {
        let verifier = CodeVerifier::new(Arc::new(StalledStore {
            load_delay: Duration::ZERO,
        }))
        .with_policy(ConsumePolicy::SingleUse)
        .with_store_timeout(Duration::from_millis(20));
        let result = verifier.verify_at("u1", "482913", 0).await;
        assert!(matches!(result, Err(VerifyError::Persistence(_))));
    }

    #[tokio::test]
    async fn store_errors_surface() {
        let verifier = CodeVerifier::new(Arc::new(BrokenStore));
        let result = verifier.verify_at("u1", "482913", 0).await;
        assert!(matches!(&result, Err(VerifyError::Persistence(_))));
        assert_eq!(result.err().map(|err| err.kind()), Some("persistence_failure"));
    }

    #[test]
    fn reject_reason_wire_names() -> Result<()> {
        assert_eq!(serde_json::to_value(RejectReason::NotFound)?, "not_found");
        assert_eq!(RejectReason::Expired.as_str(), "expired");
        assert_eq!(RejectReason::Mismatch.as_str(), "mismatch");
        Ok(())
    }

    #[test]
    fn consume_policy_parse() {
        assert_eq!("single-use".parse::<ConsumePolicy>(), Ok(ConsumePolicy::SingleUse));
        assert_eq!("Repeatable".parse::<ConsumePolicy>(), Ok(ConsumePolicy::Repeatable));
        assert!("never".parse::<ConsumePolicy>().is_err());
    }

    #[test]
    fn constant_time_eq_compares_bytes() {
        assert!(constant_time_eq(b"482913", b"482913"));
        assert!(!constant_time_eq(b"482913", b"482914"));
        assert!(!constant_time_eq(b"482913", b"48291"));
    }
}
