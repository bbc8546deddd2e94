use rand::Rng;
use regex::Regex;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use super::delivery::{CodeDelivery, EmailMessage};
use super::store::{CodeStore, VerificationRecord};
use crate::clock::{Clock, SystemClock};

pub const CODE_MIN: u32 = 100_000;
pub const CODE_MAX: u32 = 999_999;
pub const DEFAULT_CODE_TTL_SECONDS: u64 = 20 * 60;
pub const DEFAULT_SENDER: &str = "no-reply@casekeeper.dev";

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uniform over `[100000, 999999]`, so always six digits.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let code = rand::thread_rng().gen_range(CODE_MIN..=CODE_MAX);
        code.to_string()
    }
}

#[derive(Clone, Debug)]
pub struct IssuerConfig {
    sender: String,
    code_ttl: Duration,
    persist_timeout: Duration,
    delivery_timeout: Duration,
}

impl IssuerConfig {
    /// Default config: 20 minute codes, 5s persistence and 10s delivery timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sender: DEFAULT_SENDER.to_string(),
            code_ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECONDS),
            persist_timeout: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: String) -> Self {
        self.sender = sender;
        self
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.code_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_persist_timeout_ms(mut self, millis: u64) -> Self {
        self.persist_timeout = Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn with_delivery_timeout_ms(mut self, millis: u64) -> Self {
        self.delivery_timeout = Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let non_zero = |value: Duration, fallback: Duration| {
            if value.is_zero() {
                fallback
            } else {
                value
            }
        };
        let defaults = Self::new();
        Self {
            sender: if self.sender.trim().is_empty() {
                defaults.sender
            } else {
                self.sender
            },
            code_ttl: non_zero(self.code_ttl, defaults.code_ttl),
            persist_timeout: non_zero(self.persist_timeout, defaults.persist_timeout),
            delivery_timeout: non_zero(self.delivery_timeout, defaults.delivery_timeout),
        }
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    #[must_use]
    pub fn persist_timeout(&self) -> Duration {
        self.persist_timeout
    }

    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("validation failure: {0}")]
    Validation(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// The code was stored but could not be sent; the record is left in place.
    #[error("delivery failure: {0}")]
    Delivery(String),
}

impl IssueError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failure",
            Self::Persistence(_) => "persistence_failure",
            Self::Delivery(_) => "delivery_failure",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCode {
    pub user_id: String,
    pub code: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

pub struct CodeIssuer {
    store: Arc<dyn CodeStore>,
    delivery: Arc<dyn CodeDelivery>,
    generator: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    config: IssuerConfig,
}

impl CodeIssuer {
    #[must_use]
    pub fn new(
        store: Arc<dyn CodeStore>,
        delivery: Arc<dyn CodeDelivery>,
        config: IssuerConfig,
    ) -> Self {
        Self {
            store,
            delivery,
            generator: Arc::new(RandomCodeGenerator),
            clock: Arc::new(SystemClock),
            config: config.normalize(),
        }
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = generator;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Generate, persist and send a code for `user_id`.
    ///
    /// Any earlier code for the user is overwritten. Persistence happens
    /// before delivery; if delivery fails the stored code stays valid.
    ///
    /// # Errors
    /// [`IssueError::Validation`] for bad input, [`IssueError::Persistence`]
    /// when the store write fails or times out, [`IssueError::Delivery`] when
    /// the message cannot be sent.
    #[instrument(skip(self, delivery_address))]
    pub async fn issue(
        &self,
        user_id: &str,
        delivery_address: &str,
    ) -> Result<IssuedCode, IssueError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(IssueError::Validation("missing uid".to_string()));
        }
        let address = normalize_email(delivery_address);
        if address.is_empty() {
            return Err(IssueError::Validation("missing email".to_string()));
        }
        if !valid_email(&address) {
            return Err(IssueError::Validation("invalid email".to_string()));
        }

        let code = self.generator.generate();
        let issued_at = self.clock.now_millis();
        let ttl_ms = i64::try_from(self.config.code_ttl().as_millis()).unwrap_or(i64::MAX);
        let record = VerificationRecord {
            code: code.clone(),
            expires_at: issued_at.saturating_add(ttl_ms),
            created_at: issued_at,
        };

        match timeout(
            self.config.persist_timeout(),
            self.store.upsert(user_id, &record),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("Failed to persist verification code: {err:#}");
                return Err(IssueError::Persistence(format!("{err:#}")));
            }
            Err(_) => {
                error!("Persisting verification code timed out");
                return Err(IssueError::Persistence("store timed out".to_string()));
            }
        }

        let minutes = (self.config.code_ttl().as_secs() / 60).max(1);
        let message =
            EmailMessage::verification_code(self.config.sender(), &address, &code, minutes);
        match timeout(self.config.delivery_timeout(), self.delivery.send(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("Verification code stored but not delivered: {err:#}");
                return Err(IssueError::Delivery(format!("{err:#}")));
            }
            Err(_) => {
                warn!("Verification code stored but delivery timed out");
                return Err(IssueError::Delivery("delivery timed out".to_string()));
            }
        }

        info!(expires_at = record.expires_at, "verification code issued");

        Ok(IssuedCode {
            user_id: user_id.to_string(),
            code,
            issued_at,
            expires_at: record.expires_at,
        })
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::verification::store::MemoryCodeStore;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hands out a fixed sequence of codes.
    pub(crate) struct SequenceGenerator(Mutex<VecDeque<&'static str>>);

    impl SequenceGenerator {
        pub(crate) fn new(codes: &[&'static str]) -> Self {
            Self(Mutex::new(codes.iter().copied().collect()))
        }
    }

    impl CodeGenerator for SequenceGenerator {
        fn generate(&self) -> String {
            self.0
                .lock()
                .ok()
                .and_then(|mut codes| codes.pop_front())
                .unwrap_or("000000")
                .to_string()
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl CodeDelivery for RecordingSender {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            self.sent
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .push(message.clone());
            Ok(())
        }
    }

    struct FailingSender;

    #[async_trait]
    impl CodeDelivery for FailingSender {
        async fn send(&self, _message: &EmailMessage) -> Result<()> {
            Err(anyhow!("smtp unavailable"))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CodeStore for FailingStore {
        async fn upsert(&self, _user_id: &str, _record: &VerificationRecord) -> Result<()> {
            Err(anyhow!("database unavailable"))
        }
        async fn load(&self, _user_id: &str) -> Result<Option<VerificationRecord>> {
            Err(anyhow!("database unavailable"))
        }
        async fn delete(&self, _user_id: &str) -> Result<bool> {
            Err(anyhow!("database unavailable"))
        }
        async fn purge_expired(&self, _cutoff_ms: i64) -> Result<u64> {
            Err(anyhow!("database unavailable"))
        }
    }

    struct StalledSender;

    #[async_trait]
    impl CodeDelivery for StalledSender {
        async fn send(&self, _message: &EmailMessage) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    /// Never answers within any reasonable timeout.
    struct StalledStore;

    #[async_trait]
    impl CodeStore for StalledStore {
        async fn upsert(&self, _user_id: &str, _record: &VerificationRecord) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn load(&self, _user_id: &str) -> Result<Option<VerificationRecord>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
        async fn delete(&self, _user_id: &str) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(false)
        }
        async fn purge_expired(&self, _cutoff_ms: i64) -> Result<u64> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0)
        }
    }

    fn issuer(
        store: Arc<dyn CodeStore>,
        delivery: Arc<dyn CodeDelivery>,
        codes: &[&'static str],
    ) -> CodeIssuer {
        CodeIssuer::new(store, delivery, IssuerConfig::new())
            .with_generator(Arc::new(SequenceGenerator::new(codes)))
            .with_clock(Arc::new(FixedClock::new(0)))
    }

    #[test]
    fn random_codes_are_six_digits_in_range() {
        for _ in 0..1_000 {
            let code = RandomCodeGenerator.generate();
            assert_eq!(code.len(), 6, "{code}");
            let value: u32 = code.parse().unwrap_or(0);
            assert!((CODE_MIN..=CODE_MAX).contains(&value), "{code}");
        }
    }

    #[tokio::test]
    async fn issue_persists_and_sends() -> Result<()> {
        let store = Arc::new(MemoryCodeStore::new());
        let sender = Arc::new(RecordingSender::default());
        let issued = issuer(store.clone(), sender.clone(), &["482913"])
            .issue("u1", " A@B.com ")
            .await?;

        assert_eq!(issued.code, "482913");
        assert_eq!(issued.issued_at, 0);
        assert_eq!(issued.expires_at, 1_200_000);
        assert_eq!(
            store.load("u1").await?,
            Some(VerificationRecord {
                code: "482913".to_string(),
                expires_at: 1_200_000,
                created_at: 0,
            })
        );

        let sent = sender.sent.lock().map_err(|_| anyhow!("poisoned"))?;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@b.com");
        assert_eq!(sent[0].subject, "Your 2FA Code");
        assert_eq!(sent[0].from, DEFAULT_SENDER);
        assert!(sent[0].html.contains("482913"));
        assert!(sent[0].html.contains("expires in 20 minutes"));
        Ok(())
    }

    #[tokio::test]
    async fn second_issue_overwrites_first() -> Result<()> {
        let store = Arc::new(MemoryCodeStore::new());
        let clock = Arc::new(FixedClock::new(0));
        let issuer = CodeIssuer::new(
            store.clone(),
            Arc::new(RecordingSender::default()),
            IssuerConfig::new(),
        )
        .with_generator(Arc::new(SequenceGenerator::new(&["111111", "222222"])))
        .with_clock(clock.clone());

        issuer.issue("u1", "a@b.com").await?;
        clock.set(60_000);
        let second = issuer.issue("u1", "a@b.com").await?;

        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.load("u1").await?,
            Some(VerificationRecord {
                code: second.code,
                expires_at: 1_260_000,
                created_at: 60_000,
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_issue_leaves_one_record() -> Result<()> {
        let store = Arc::new(MemoryCodeStore::new());
        let issuer = issuer(
            store.clone(),
            Arc::new(RecordingSender::default()),
            &["111111", "222222"],
        );

        let (first, second) = tokio::join!(issuer.issue("u1", "a@b.com"), issuer.issue("u1", "a@b.com"));
        let codes = [first?.code, second?.code];

        assert_eq!(store.len().await, 1);
        let stored = store
            .load("u1")
            .await?
            .ok_or_else(|| anyhow!("missing record"))?;
        assert!(codes.contains(&stored.code));
        Ok(())
    }

    #[tokio::test]
    async fn validation_failures() {
        let issuer = issuer(
            Arc::new(MemoryCodeStore::new()),
            Arc::new(RecordingSender::default()),
            &[],
        );
        for (uid, email) in [("", "a@b.com"), ("  ", "a@b.com"), ("u1", ""), ("u1", "not-an-email")] {
            let result = issuer.issue(uid, email).await;
            assert!(
                matches!(result, Err(IssueError::Validation(_))),
                "uid {uid:?} email {email:?}"
            );
        }
    }

    #[tokio::test]
    async fn persistence_failure_skips_delivery() {
        let sender = Arc::new(RecordingSender::default());
        let result = issuer(Arc::new(FailingStore), sender.clone(), &["123456"])
            .issue("u1", "a@b.com")
            .await;
        assert!(matches!(&result, Err(IssueError::Persistence(_))));
        assert_eq!(result.err().map(|err| err.kind()), Some("persistence_failure"));
        assert!(sender.sent.lock().map(|sent| sent.is_empty()).unwrap_or(false));
    }

    #[tokio::test]
    async fn delivery_failure_keeps_record() -> Result<()> {
        let store = Arc::new(MemoryCodeStore::new());
        let result = issuer(store.clone(), Arc::new(FailingSender), &["654321"])
            .issue("u1", "a@b.com")
            .await;
        assert!(matches!(result, Err(IssueError::Delivery(_))));
        assert_eq!(
            store.load("u1").await?.map(|record| record.code),
            Some("654321".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn delivery_timeout_is_a_delivery_failure() {
        let issuer = CodeIssuer::new(
            Arc::new(MemoryCodeStore::new()),
            Arc::new(StalledSender),
            IssuerConfig::new().with_delivery_timeout_ms(20),
        );
        let result = issuer.issue("u1", "a@b.com").await;
        assert!(matches!(result, Err(IssueError::Delivery(_))));
    }

    #[tokio::test]
    async fn store_timeout_is_a_persistence_failure() {
        let sender = Arc::new(RecordingSender::default());
        let issuer = CodeIssuer::new(
            Arc::new(StalledStore),
            sender.clone(),
            IssuerConfig::new().with_persist_timeout_ms(20),
        );
        let result = issuer.issue("u1", "a@b.com").await;
        assert!(matches!(result, Err(IssueError::Persistence(_))));
        assert!(sender.sent.lock().map(|sent| sent.is_empty()).unwrap_or(false));
    }

    #[test]
    fn config_normalize_restores_defaults() {
        let config = IssuerConfig::new()
            .with_sender(" ".to_string())
            .with_code_ttl_seconds(0)
            .with_persist_timeout_ms(0)
            .normalize();
        assert_eq!(config.sender(), DEFAULT_SENDER);
        assert_eq!(config.code_ttl(), Duration::from_secs(1_200));
        assert_eq!(config.persist_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("missing-domain@"));
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }
}
