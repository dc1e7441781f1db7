//! Season and episode repository
//!
//! Show hierarchy rows keyed on (parent, number) so re-ingesting a season or
//! episode refreshes it in place.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Season record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SeasonRecord {
    pub id: Uuid,
    pub media_item_id: Uuid,
    pub number: i32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub poster_url: Option<String>,
    pub air_date: Option<chrono::NaiveDate>,
    pub episode_count: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Input for the season upsert
#[derive(Debug, Clone)]
pub struct UpsertSeason {
    pub media_item_id: Uuid,
    pub number: i32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub poster_url: Option<String>,
    pub air_date: Option<chrono::NaiveDate>,
    pub episode_count: Option<i32>,
}

/// Episode record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EpisodeRecord {
    pub id: Uuid,
    pub season_id: Uuid,
    pub number: i32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<chrono::NaiveDate>,
    pub runtime: Option<i32>,
    pub still_url: Option<String>,
    pub rating: Option<f64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Input for the episode upsert
#[derive(Debug, Clone)]
pub struct UpsertEpisode {
    pub season_id: Uuid,
    pub number: i32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<chrono::NaiveDate>,
    pub runtime: Option<i32>,
    pub still_url: Option<String>,
    pub rating: Option<f64>,
}

pub struct HierarchyRepository {
    pool: PgPool,
}

impl HierarchyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a season keyed on (show, number)
    pub async fn upsert_season(&self, input: UpsertSeason) -> Result<SeasonRecord> {
        let record = sqlx::query_as::<_, SeasonRecord>(
            r#"
            INSERT INTO seasons (
                media_item_id, number, title, overview, poster_url,
                air_date, episode_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (media_item_id, number) DO UPDATE SET
                title = COALESCE(EXCLUDED.title, seasons.title),
                overview = COALESCE(EXCLUDED.overview, seasons.overview),
                poster_url = COALESCE(EXCLUDED.poster_url, seasons.poster_url),
                air_date = COALESCE(EXCLUDED.air_date, seasons.air_date),
                episode_count = COALESCE(EXCLUDED.episode_count, seasons.episode_count),
                updated_at = NOW()
            RETURNING id, media_item_id, number, title, overview, poster_url,
                      air_date, episode_count, created_at, updated_at
            "#,
        )
        .bind(input.media_item_id)
        .bind(input.number)
        .bind(&input.title)
        .bind(&input.overview)
        .bind(&input.poster_url)
        .bind(input.air_date)
        .bind(input.episode_count)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert or refresh an episode keyed on (season, number)
    pub async fn upsert_episode(&self, input: UpsertEpisode) -> Result<EpisodeRecord> {
        let record = sqlx::query_as::<_, EpisodeRecord>(
            r#"
            INSERT INTO episodes (
                season_id, number, title, overview, air_date,
                runtime, still_url, rating
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (season_id, number) DO UPDATE SET
                title = COALESCE(EXCLUDED.title, episodes.title),
                overview = COALESCE(EXCLUDED.overview, episodes.overview),
                air_date = COALESCE(EXCLUDED.air_date, episodes.air_date),
                runtime = COALESCE(EXCLUDED.runtime, episodes.runtime),
                still_url = COALESCE(EXCLUDED.still_url, episodes.still_url),
                rating = COALESCE(EXCLUDED.rating, episodes.rating),
                updated_at = NOW()
            RETURNING id, season_id, number, title, overview, air_date,
                      runtime, still_url, rating, created_at, updated_at
            "#,
        )
        .bind(input.season_id)
        .bind(input.number)
        .bind(&input.title)
        .bind(&input.overview)
        .bind(input.air_date)
        .bind(input.runtime)
        .bind(&input.still_url)
        .bind(input.rating)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// List seasons of a show, in order
    pub async fn seasons_for_show(&self, media_item_id: Uuid) -> Result<Vec<SeasonRecord>> {
        let records = sqlx::query_as::<_, SeasonRecord>(
            r#"
            SELECT id, media_item_id, number, title, overview, poster_url,
                   air_date, episode_count, created_at, updated_at
            FROM seasons
            WHERE media_item_id = $1
            ORDER BY number
            "#,
        )
        .bind(media_item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List episodes of a season, in order
    pub async fn episodes_for_season(&self, season_id: Uuid) -> Result<Vec<EpisodeRecord>> {
        let records = sqlx::query_as::<_, EpisodeRecord>(
            r#"
            SELECT id, season_id, number, title, overview, air_date,
                   runtime, still_url, rating, created_at, updated_at
            FROM episodes
            WHERE season_id = $1
            ORDER BY number
            "#,
        )
        .bind(season_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
