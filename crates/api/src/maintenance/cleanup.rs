//! Conversation retention cleanup
//!
//! Archived conversations older than the retention window are hard-deleted
//! together with their messages, message statistics and agent view rows.
//! Deletion happens in fixed-size batches, each in its own transaction, so a
//! failure part-way through leaves earlier batches committed and the rest
//! untouched. Unarchived conversations are never eligible.
//!
//! Runs are not coordinated: two concurrent triggers may race for the same
//! batch, in which case the second delete simply affects fewer rows.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use std::time::Instant;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Row key in `maintenance_job_stats`
pub const CLEANUP_JOB_NAME: &str = "conversation_cleanup";

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persisted run statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
pub struct JobStats {
    pub total_runs: i64,
    pub total_deleted: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
    pub last_run_duration_ms: Option<i64>,
    pub last_run_deleted: Option<i64>,
}

/// Result of a dry run or a trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// Retention is unset or zero
    Disabled,
    DryRun {
        retention_days: u32,
        eligible: u64,
    },
    Completed {
        retention_days: u32,
        deleted: u64,
        batches: u32,
        duration_ms: u64,
        #[serde(skip)]
        deleted_ids: Vec<Uuid>,
    },
}

/// Storage operations the cleanup job needs
#[async_trait]
pub trait RetentionStore: Send + Sync {
    async fn count_eligible(&self, cutoff: OffsetDateTime) -> Result<u64, CleanupError>;

    /// Up to `limit` eligible conversation ids, oldest archive first
    async fn next_batch(&self, cutoff: OffsetDateTime, limit: u32)
        -> Result<Vec<Uuid>, CleanupError>;

    /// Delete the conversations and their dependent rows atomically.
    /// Returns the number of conversations removed.
    async fn delete_batch(&self, ids: &[Uuid]) -> Result<u64, CleanupError>;

    async fn load_stats(&self) -> Result<JobStats, CleanupError>;

    async fn record_run(
        &self,
        finished_at: OffsetDateTime,
        duration_ms: u64,
        deleted: u64,
    ) -> Result<(), CleanupError>;
}

/// Retention cleanup over any [`RetentionStore`]
pub struct CleanupService<S> {
    store: S,
    retention_days: Option<u32>,
    batch_size: u32,
}

impl<S: RetentionStore> CleanupService<S> {
    pub fn new(store: S, retention_days: Option<u32>, batch_size: u32) -> Self {
        Self {
            store,
            retention_days: retention_days.filter(|d| *d > 0),
            batch_size: batch_size.max(1),
        }
    }

    fn cutoff(days: u32, now: OffsetDateTime) -> OffsetDateTime {
        now - Duration::days(i64::from(days))
    }

    /// Count what a trigger would delete right now
    pub async fn dry_run(&self) -> Result<CleanupOutcome, CleanupError> {
        let Some(days) = self.retention_days else {
            return Ok(CleanupOutcome::Disabled);
        };

        let eligible = self
            .store
            .count_eligible(Self::cutoff(days, OffsetDateTime::now_utc()))
            .await?;

        tracing::info!(retention_days = days, eligible, "Cleanup dry run");
        Ok(CleanupOutcome::DryRun {
            retention_days: days,
            eligible,
        })
    }

    /// Delete every eligible conversation in batches
    pub async fn trigger(&self) -> Result<CleanupOutcome, CleanupError> {
        let Some(days) = self.retention_days else {
            tracing::debug!("Cleanup skipped: retention disabled");
            return Ok(CleanupOutcome::Disabled);
        };

        let started = Instant::now();
        let cutoff = Self::cutoff(days, OffsetDateTime::now_utc());
        let mut deleted = 0u64;
        let mut batches = 0u32;
        let mut deleted_ids = Vec::new();

        loop {
            let ids = self.store.next_batch(cutoff, self.batch_size).await?;
            if ids.is_empty() {
                break;
            }

            let removed = self.store.delete_batch(&ids).await?;
            deleted += removed;
            batches += 1;
            tracing::debug!(batch = batches, removed, "Cleanup batch committed");

            let short = ids.len() < self.batch_size as usize;
            deleted_ids.extend(ids);
            if short {
                break;
            }
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.store
            .record_run(OffsetDateTime::now_utc(), duration_ms, deleted)
            .await?;

        tracing::info!(
            retention_days = days,
            deleted,
            batches,
            duration_ms,
            "Conversation cleanup completed"
        );

        Ok(CleanupOutcome::Completed {
            retention_days: days,
            deleted,
            batches,
            duration_ms,
            deleted_ids,
        })
    }

    pub async fn stats(&self) -> Result<JobStats, CleanupError> {
        self.store.load_stats().await
    }
}

/// Postgres-backed retention store
#[derive(Clone)]
pub struct PgRetentionStore {
    pool: PgPool,
}

impl PgRetentionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetentionStore for PgRetentionStore {
    async fn count_eligible(&self, cutoff: OffsetDateTime) -> Result<u64, CleanupError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversations WHERE archived = TRUE AND archived_at < $1",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn next_batch(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<Uuid>, CleanupError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM conversations
            WHERE archived = TRUE AND archived_at < $1
            ORDER BY archived_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete_batch(&self, ids: &[Uuid]) -> Result<u64, CleanupError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM message_statistics WHERE conversation_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM agent_conversation_views WHERE conversation_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM conversations WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn load_stats(&self) -> Result<JobStats, CleanupError> {
        let stats = sqlx::query_as::<_, JobStats>(
            r#"
            SELECT total_runs, total_deleted, last_run_at, last_run_duration_ms, last_run_deleted
            FROM maintenance_job_stats
            WHERE job_name = $1
            "#,
        )
        .bind(CLEANUP_JOB_NAME)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stats.unwrap_or_default())
    }

    async fn record_run(
        &self,
        finished_at: OffsetDateTime,
        duration_ms: u64,
        deleted: u64,
    ) -> Result<(), CleanupError> {
        let deleted = i64::try_from(deleted).unwrap_or(i64::MAX);
        let duration_ms = i64::try_from(duration_ms).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO maintenance_job_stats
                (job_name, total_runs, total_deleted, last_run_at, last_run_duration_ms, last_run_deleted)
            VALUES ($1, 1, $2, $3, $4, $2)
            ON CONFLICT (job_name) DO UPDATE SET
                total_runs = maintenance_job_stats.total_runs + 1,
                total_deleted = maintenance_job_stats.total_deleted + EXCLUDED.total_deleted,
                last_run_at = EXCLUDED.last_run_at,
                last_run_duration_ms = EXCLUDED.last_run_duration_ms,
                last_run_deleted = EXCLUDED.last_run_deleted
            "#,
        )
        .bind(CLEANUP_JOB_NAME)
        .bind(deleted)
        .bind(finished_at)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
