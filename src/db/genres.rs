//! Genre repository
//!
//! Genres are deduplicated by normalized name so provider spelling variants
//! ("Sci-Fi" vs "Science Fiction") collapse to one row, linked to media
//! items through a join table.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Genre record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GenreRecord {
    pub id: Uuid,
    pub name: String,
}

pub struct GenreRepository {
    pool: PgPool,
}

impl GenreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace a media item's genre links with the given names, creating
    /// genre rows as needed
    pub async fn set_for_media(&self, media_item_id: Uuid, names: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM media_genres WHERE media_item_id = $1")
            .bind(media_item_id)
            .execute(&mut *tx)
            .await?;

        for name in names {
            let normalized = normalize_genre(name);
            if normalized.is_empty() {
                continue;
            }

            let genre_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO genres (name)
                VALUES ($1)
                ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                RETURNING id
                "#,
            )
            .bind(&normalized)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO media_genres (media_item_id, genre_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(media_item_id)
            .bind(genre_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List a media item's genres
    pub async fn for_media(&self, media_item_id: Uuid) -> Result<Vec<GenreRecord>> {
        let records = sqlx::query_as::<_, GenreRecord>(
            r#"
            SELECT g.id, g.name
            FROM genres g
            JOIN media_genres mg ON mg.genre_id = g.id
            WHERE mg.media_item_id = $1
            ORDER BY g.name
            "#,
        )
        .bind(media_item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

/// Canonical genre name: trimmed, title-cased variants collapsed, known
/// provider synonyms mapped to one spelling
pub fn normalize_genre(name: &str) -> String {
    let trimmed = name.trim();
    match trimmed.to_lowercase().as_str() {
        "sci-fi" | "scifi" | "science-fiction" | "science fiction" => {
            "Science Fiction".to_string()
        }
        "sci-fi & fantasy" | "science fiction & fantasy" => "Sci-Fi & Fantasy".to_string(),
        "rom-com" | "romantic comedy" => "Romantic Comedy".to_string(),
        "docu" | "documentaries" => "Documentary".to_string(),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synonyms_collapse() {
        assert_eq!(normalize_genre("Sci-Fi"), "Science Fiction");
        assert_eq!(normalize_genre("science fiction"), "Science Fiction");
        assert_eq!(normalize_genre("  Drama "), "Drama");
        assert_eq!(normalize_genre("Documentaries"), "Documentary");
    }
}
