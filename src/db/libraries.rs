//! Library database repository

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::services::provider::MediaKind;

/// Library record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LibraryRecord {
    pub id: Uuid,
    pub name: String,
    pub root_path: String,
    pub kind: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl LibraryRecord {
    pub fn media_kind(&self) -> Option<MediaKind> {
        MediaKind::parse(&self.kind)
    }
}

/// Input for creating a library
#[derive(Debug)]
pub struct CreateLibrary {
    pub name: String,
    pub root_path: String,
    pub kind: MediaKind,
}

pub struct LibraryRepository {
    pool: PgPool,
}

impl LibraryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a library by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<LibraryRecord>> {
        let record = sqlx::query_as::<_, LibraryRecord>(
            r#"
            SELECT id, name, root_path, kind, created_at, updated_at
            FROM libraries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all libraries
    pub async fn list(&self) -> Result<Vec<LibraryRecord>> {
        let records = sqlx::query_as::<_, LibraryRecord>(
            r#"
            SELECT id, name, root_path, kind, created_at, updated_at
            FROM libraries
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Get a library by name, creating it if absent. The root path and kind
    /// are refreshed on every call so configuration changes take effect.
    pub async fn get_or_create(&self, input: CreateLibrary) -> Result<LibraryRecord> {
        let record = sqlx::query_as::<_, LibraryRecord>(
            r#"
            INSERT INTO libraries (name, root_path, kind)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                root_path = EXCLUDED.root_path,
                kind = EXCLUDED.kind,
                updated_at = NOW()
            RETURNING id, name, root_path, kind, created_at, updated_at
            "#,
        )
        .bind(&input.name)
        .bind(&input.root_path)
        .bind(input.kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Delete a library
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM libraries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
