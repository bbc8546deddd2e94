//! Persistence for verification codes, one row per user.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, info_span, Instrument};

use crate::clock::Clock;

/// Stored shape of a live code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub code: String,
    /// Epoch milliseconds.
    pub expires_at: i64,
    /// Epoch milliseconds.
    pub created_at: i64,
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Insert or overwrite the record for `user_id`.
    async fn upsert(&self, user_id: &str, record: &VerificationRecord) -> Result<()>;

    async fn load(&self, user_id: &str) -> Result<Option<VerificationRecord>>;

    /// Returns `true` if a record was removed.
    async fn delete(&self, user_id: &str) -> Result<bool>;

    /// Remove records whose `expires_at` is before `cutoff_ms`.
    async fn purge_expired(&self, cutoff_ms: i64) -> Result<u64>;
}

#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    records: RwLock<HashMap<String, VerificationRecord>>,
}

impl MemoryCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn upsert(&self, user_id: &str, record: &VerificationRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(user_id.to_string(), record.clone());
        Ok(())
    }

    async fn load(&self, user_id: &str) -> Result<Option<VerificationRecord>> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(user_id).is_some())
    }

    async fn purge_expired(&self, cutoff_ms: i64) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at >= cutoff_ms);
        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }
}

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Postgres-backed store using the `verification_codes` table.
#[derive(Clone, Debug)]
pub struct PgCodeStore {
    pool: PgPool,
}

impl PgCodeStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and index if they are missing.
    ///
    /// # Errors
    /// Returns an error if the statements cannot be executed.
    pub async fn ensure_schema(&self) -> Result<()> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "CREATE",
            db.statement = SCHEMA
        );
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to apply verification code schema")?;
        Ok(())
    }
}

#[async_trait]
impl CodeStore for PgCodeStore {
    async fn upsert(&self, user_id: &str, record: &VerificationRecord) -> Result<()> {
        let query = r"
            INSERT INTO verification_codes (user_id, code, expires_at, created_at)
            VALUES ($1, $2, $3, to_timestamp($4))
            ON CONFLICT (user_id) DO UPDATE
            SET code = EXCLUDED.code,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        #[allow(clippy::cast_precision_loss)]
        let created_at_seconds = record.created_at as f64 / 1000.0;
        sqlx::query(query)
            .bind(user_id)
            .bind(&record.code)
            .bind(record.expires_at)
            .bind(created_at_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert verification code")?;
        Ok(())
    }

    async fn load(&self, user_id: &str) -> Result<Option<VerificationRecord>> {
        let query = r"
            SELECT code,
                   expires_at,
                   (EXTRACT(EPOCH FROM created_at) * 1000)::BIGINT AS created_at
            FROM verification_codes
            WHERE user_id = $1
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load verification code")?;
        Ok(row.map(|row| VerificationRecord {
            code: row.get("code"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
        }))
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        let query = "DELETE FROM verification_codes WHERE user_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete verification code")?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, cutoff_ms: i64) -> Result<u64> {
        let query = "DELETE FROM verification_codes WHERE expires_at < $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff_ms)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired verification codes")?;
        Ok(result.rows_affected())
    }
}

/// Spawn a background task that deletes records expired for longer than
/// `retention`. Records inside the retention window stay so the verifier can
/// still answer `Expired` instead of `NotFound`.
pub fn spawn_expiry_sweeper(
    store: Arc<dyn CodeStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    let interval = if interval.is_zero() {
        Duration::from_secs(1)
    } else {
        interval
    };
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);

    tokio::spawn(async move {
        loop {
            let cutoff = clock.now_millis().saturating_sub(retention_ms);
            match store.purge_expired(cutoff).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "purged expired verification codes"),
                Err(err) => error!("verification code sweep failed: {err:#}"),
            }

            sleep(interval).await;
        }
    })
}
