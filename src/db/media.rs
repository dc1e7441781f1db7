//! Canonical media item repository
//!
//! One row per catalog entity, resolved through `external_refs`: the
//! (source, external id) pair is globally unique and points at exactly one
//! canonical row. Re-ingesting the same external id refreshes that row, no
//! matter which library the item arrived through; library membership is a
//! separate link table. Saves are idempotent and carry secondary references
//! in the same transaction.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::services::provider::MediaKind;

/// Source name for the primary catalog reference
const PRIMARY_SOURCE: &str = "tmdb";

/// TMDB ids for movies and shows overlap, so the primary reference id
/// carries the kind
fn primary_external_id(kind: MediaKind, tmdb_id: i64) -> String {
    format!("{}:{}", kind.as_str(), tmdb_id)
}

/// Canonical media record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaItemRecord {
    pub id: Uuid,
    pub kind: String,
    pub tmdb_id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub release_date: Option<chrono::NaiveDate>,
    pub rating: Option<f64>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub logo_url: Option<String>,
    pub textless_poster_url: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub path: Option<String>,
    pub size_bytes: Option<i64>,
    pub season_count: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Input for the idempotent media upsert
#[derive(Debug, Clone)]
pub struct UpsertMediaItem {
    /// Library the item was discovered in; recorded as a membership link
    pub library_id: Uuid,
    pub kind: MediaKind,
    pub tmdb_id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub release_date: Option<chrono::NaiveDate>,
    pub rating: Option<f64>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub logo_url: Option<String>,
    pub textless_poster_url: Option<String>,
    pub path: Option<String>,
    pub size_bytes: Option<i64>,
    pub season_count: Option<i32>,
    /// Secondary catalog references, e.g. ("imdb", "tt0111161")
    pub external_refs: Vec<(String, String)>,
}

const RECORD_COLUMNS: &str = r#"id, kind, tmdb_id, title, overview, release_date,
    rating, poster_url, backdrop_url, logo_url, textless_poster_url,
    poster_path, backdrop_path, path, size_bytes, season_count,
    created_at, updated_at"#;

pub struct MediaRepository {
    pool: PgPool,
}

impl MediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh the canonical row for an external id.
    ///
    /// The row is resolved through the primary reference lookup: if the
    /// (source, external id) pair already points at a media item, that item
    /// is updated in place; otherwise a new row is inserted. References and
    /// the library membership link ride in the same transaction, so a second
    /// ingest of the same id can never produce a second canonical row.
    pub async fn upsert(&self, input: UpsertMediaItem) -> Result<MediaItemRecord> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT media_item_id FROM external_refs WHERE source = $1 AND external_id = $2",
        )
        .bind(PRIMARY_SOURCE)
        .bind(primary_external_id(input.kind, input.tmdb_id))
        .fetch_optional(&mut *tx)
        .await?;

        let record = match existing {
            Some(id) => {
                sqlx::query_as::<_, MediaItemRecord>(&format!(
                    r#"
                    UPDATE media_items SET
                        title = $2,
                        overview = COALESCE($3, overview),
                        release_date = COALESCE($4, release_date),
                        rating = COALESCE($5, rating),
                        poster_url = COALESCE($6, poster_url),
                        backdrop_url = COALESCE($7, backdrop_url),
                        logo_url = COALESCE($8, logo_url),
                        textless_poster_url = COALESCE($9, textless_poster_url),
                        path = COALESCE($10, path),
                        size_bytes = COALESCE($11, size_bytes),
                        season_count = COALESCE($12, season_count),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING {RECORD_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(&input.title)
                .bind(&input.overview)
                .bind(input.release_date)
                .bind(input.rating)
                .bind(&input.poster_url)
                .bind(&input.backdrop_url)
                .bind(&input.logo_url)
                .bind(&input.textless_poster_url)
                .bind(&input.path)
                .bind(input.size_bytes)
                .bind(input.season_count)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, MediaItemRecord>(&format!(
                    r#"
                    INSERT INTO media_items (
                        kind, tmdb_id, title, overview, release_date, rating,
                        poster_url, backdrop_url, logo_url, textless_poster_url,
                        path, size_bytes, season_count
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    RETURNING {RECORD_COLUMNS}
                    "#
                ))
                .bind(input.kind.as_str())
                .bind(input.tmdb_id)
                .bind(&input.title)
                .bind(&input.overview)
                .bind(input.release_date)
                .bind(input.rating)
                .bind(&input.poster_url)
                .bind(&input.backdrop_url)
                .bind(&input.logo_url)
                .bind(&input.textless_poster_url)
                .bind(&input.path)
                .bind(input.size_bytes)
                .bind(input.season_count)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let mut refs = vec![(
            PRIMARY_SOURCE.to_string(),
            primary_external_id(input.kind, input.tmdb_id),
        )];
        refs.extend(input.external_refs.iter().cloned());

        for (source, external_id) in &refs {
            sqlx::query(
                r#"
                INSERT INTO external_refs (media_item_id, source, external_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (source, external_id) DO UPDATE SET
                    media_item_id = EXCLUDED.media_item_id
                "#,
            )
            .bind(record.id)
            .bind(source)
            .bind(external_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO library_media (library_id, media_item_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(input.library_id)
        .bind(record.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Resolve a canonical item through any of its external references
    pub async fn get_by_external_ref(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<MediaItemRecord>> {
        let record = sqlx::query_as::<_, MediaItemRecord>(&format!(
            r#"
            SELECT {}
            FROM media_items m
            JOIN external_refs r ON r.media_item_id = m.id
            WHERE r.source = $1 AND r.external_id = $2
            "#,
            qualified_columns("m")
        ))
        .bind(source)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List every media item linked to a library
    pub async fn list_by_library(&self, library_id: Uuid) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            r#"
            SELECT {}
            FROM media_items m
            JOIN library_media lm ON lm.media_item_id = m.id
            WHERE lm.library_id = $1
            ORDER BY m.title
            "#,
            qualified_columns("m")
        ))
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// External ids of a library's items whose persisted metadata already
    /// passes the completeness check: a title, an overview, and at least one
    /// artwork slot. Used to seed the lookup cache so re-scans skip the
    /// network.
    pub async fn complete_tmdb_ids(
        &self,
        library_id: Uuid,
        kind: MediaKind,
    ) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT m.tmdb_id
            FROM media_items m
            JOIN library_media lm ON lm.media_item_id = m.id
            WHERE lm.library_id = $1 AND m.kind = $2
              AND m.title <> ''
              AND m.overview IS NOT NULL
              AND (m.poster_url IS NOT NULL OR m.backdrop_url IS NOT NULL)
            "#,
        )
        .bind(library_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Record where cached artwork landed on disk
    pub async fn set_artwork_paths(
        &self,
        id: Uuid,
        poster_path: Option<&str>,
        backdrop_path: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media_items
            SET poster_path = COALESCE($2, poster_path),
                backdrop_path = COALESCE($3, backdrop_path),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(poster_path)
        .bind(backdrop_path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count media items linked to a library
    pub async fn count_by_library(&self, library_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM library_media WHERE library_id = $1",
        )
        .bind(library_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Record columns qualified with a table alias, for joined selects
fn qualified_columns(alias: &str) -> String {
    RECORD_COLUMNS
        .split(',')
        .map(|col| format!("{}.{}", alias, col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_external_id_disambiguates_kinds() {
        assert_eq!(primary_external_id(MediaKind::Movie, 100), "movie:100");
        assert_eq!(primary_external_id(MediaKind::Show, 100), "show:100");
    }

    #[test]
    fn test_qualified_columns_prefixes_every_column() {
        let cols = qualified_columns("m");
        assert!(cols.starts_with("m.id, m.kind"));
        assert!(cols.contains("m.textless_poster_url"));
        assert!(!cols.contains(" ,"));
    }
}
