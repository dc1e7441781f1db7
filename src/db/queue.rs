//! Database-backed queue store
//!
//! Persists the work queue's two ordered lists as rows in `queue_entries`,
//! ordered by an explicit `position` column. Every move between lists is a
//! single statement, so a crash mid-consume can never lose or duplicate a
//! payload; `FOR UPDATE SKIP LOCKED` lets concurrent workers pop distinct
//! heads without serializing on each other.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::services::job_queue::{QueueList, QueueStore};

/// Poll interval while waiting for a payload to appear
const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn list_name(list: QueueList) -> &'static str {
    match list {
        QueueList::Main => "main",
        QueueList::InFlight => "in_flight",
    }
}

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_move_head(&self, queue: &str) -> Result<Option<String>> {
        let payload: Option<String> = sqlx::query_scalar(
            r#"
            WITH head AS (
                SELECT id FROM queue_entries
                WHERE queue = $1 AND list = 'main'
                ORDER BY position
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_entries q
            SET list = 'in_flight',
                position = (
                    SELECT COALESCE(MAX(position), 0) + 1
                    FROM queue_entries
                    WHERE queue = $1 AND list = 'in_flight'
                )
            FROM head
            WHERE q.id = head.id
            RETURNING q.payload
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payload)
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn push_tail(&self, queue: &str, payload: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_entries (queue, list, position, payload)
            SELECT $1, 'main', COALESCE(MAX(position), 0) + 1, $2
            FROM queue_entries
            WHERE queue = $1 AND list = 'main'
            "#,
        )
        .bind(queue)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn move_head_to_inflight(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(payload) = self.try_move_head(queue).await? {
                return Ok(Some(payload));
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn move_inflight_back(&self, queue: &str) -> Result<Option<String>> {
        let payload: Option<String> = sqlx::query_scalar(
            r#"
            WITH tail AS (
                SELECT id FROM queue_entries
                WHERE queue = $1 AND list = 'in_flight'
                ORDER BY position DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_entries q
            SET list = 'main',
                position = (
                    SELECT COALESCE(MIN(position), 0) - 1
                    FROM queue_entries
                    WHERE queue = $1 AND list = 'main'
                )
            FROM tail
            WHERE q.id = tail.id
            RETURNING q.payload
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payload)
    }

    async fn remove_first(&self, queue: &str, list: QueueList, payload: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_entries
            WHERE id = (
                SELECT id FROM queue_entries
                WHERE queue = $1 AND list = $2 AND payload = $3
                ORDER BY position
                LIMIT 1
            )
            "#,
        )
        .bind(queue)
        .bind(list_name(list))
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn len(&self, queue: &str, list: QueueList) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_entries WHERE queue = $1 AND list = $2",
        )
        .bind(queue)
        .bind(list_name(list))
        .fetch_one(&self.pool)
        .await?;

        Ok(count as usize)
    }
}
