//! Scan job database repository
//!
//! One row per scan run. Counters only ever move forward; the orchestrator
//! observes `status` between items so an externally written `paused` or
//! `failed` stops new work without clobbering the writer's value.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Scan job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::InProgress => "in_progress",
            ScanStatus::Paused => "paused",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ScanStatus::Pending),
            "in_progress" => Some(ScanStatus::InProgress),
            "paused" => Some(ScanStatus::Paused),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            "cancelled" => Some(ScanStatus::Cancelled),
            _ => None,
        }
    }

    /// States under which the orchestrator keeps admitting work
    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Pending | ScanStatus::InProgress)
    }
}

/// Scan job record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanJobRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    pub status: String,
    pub metadata_status: String,
    pub total_items: i32,
    pub processed_items: i32,
    pub failed_items: i32,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ScanJobRecord {
    pub fn scan_status(&self) -> Option<ScanStatus> {
        ScanStatus::parse(&self.status)
    }
}

pub struct ScanJobRepository {
    pool: PgPool,
}

impl ScanJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new pending scan job for a library
    pub async fn create(&self, library_id: Uuid) -> Result<ScanJobRecord> {
        let record = sqlx::query_as::<_, ScanJobRecord>(
            r#"
            INSERT INTO scan_jobs (library_id)
            VALUES ($1)
            RETURNING id, library_id, status, metadata_status, total_items,
                      processed_items, failed_items, started_at, finished_at,
                      created_at, updated_at
            "#,
        )
        .bind(library_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get a scan job by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<ScanJobRecord>> {
        let record = sqlx::query_as::<_, ScanJobRecord>(
            r#"
            SELECT id, library_id, status, metadata_status, total_items,
                   processed_items, failed_items, started_at, finished_at,
                   created_at, updated_at
            FROM scan_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Newest scan job for a library, any state
    pub async fn latest_for_library(&self, library_id: Uuid) -> Result<Option<ScanJobRecord>> {
        let record = sqlx::query_as::<_, ScanJobRecord>(
            r#"
            SELECT id, library_id, status, metadata_status, total_items,
                   processed_items, failed_items, started_at, finished_at,
                   created_at, updated_at
            FROM scan_jobs
            WHERE library_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(library_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Mark a job in progress and stamp its start time
    pub async fn mark_started(&self, id: Uuid, total_items: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = 'in_progress', total_items = $2,
                started_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(total_items)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set the terminal status and stamp the finish time
    pub async fn mark_finished(&self, id: Uuid, status: ScanStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = $2, finished_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update the metadata sub-status ('not_started', 'in_progress',
    /// 'completed', 'failed')
    pub async fn set_metadata_status(&self, id: Uuid, metadata_status: &str) -> Result<()> {
        sqlx::query(
            "UPDATE scan_jobs SET metadata_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(metadata_status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Increment the processed counter on the newest active job for a
    /// library. Queue workers use this form: a retried job may land after
    /// its original scan finished, and must not touch a newer run's counts.
    pub async fn increment_processed(&self, library_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET processed_items = processed_items + 1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM scan_jobs
                WHERE library_id = $1 AND status IN ('pending', 'in_progress')
                ORDER BY created_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(library_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Increment the failure counter on the newest active job for a library
    pub async fn increment_failed(&self, library_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET failed_items = failed_items + 1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM scan_jobs
                WHERE library_id = $1 AND status IN ('pending', 'in_progress')
                ORDER BY created_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(library_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
