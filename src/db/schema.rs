//! Schema bootstrap
//!
//! Creates every table the service needs on startup. All statements are
//! idempotent so repeated startups against the same database are safe.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::debug;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS libraries (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name TEXT NOT NULL UNIQUE,
        root_path TEXT NOT NULL,
        kind TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scan_jobs (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        library_id UUID NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
        status TEXT NOT NULL DEFAULT 'pending',
        metadata_status TEXT NOT NULL DEFAULT 'not_started',
        total_items INTEGER NOT NULL DEFAULT 0,
        processed_items INTEGER NOT NULL DEFAULT 0,
        failed_items INTEGER NOT NULL DEFAULT 0,
        started_at TIMESTAMPTZ,
        finished_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_scan_jobs_library_created
        ON scan_jobs (library_id, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media_items (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        kind TEXT NOT NULL,
        tmdb_id BIGINT NOT NULL,
        title TEXT NOT NULL,
        overview TEXT,
        release_date DATE,
        rating DOUBLE PRECISION,
        poster_url TEXT,
        backdrop_url TEXT,
        logo_url TEXT,
        textless_poster_url TEXT,
        poster_path TEXT,
        backdrop_path TEXT,
        path TEXT,
        size_bytes BIGINT,
        season_count INTEGER,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS external_refs (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        media_item_id UUID NOT NULL REFERENCES media_items(id) ON DELETE CASCADE,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        UNIQUE (source, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS library_media (
        library_id UUID NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
        media_item_id UUID NOT NULL REFERENCES media_items(id) ON DELETE CASCADE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (library_id, media_item_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS seasons (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        media_item_id UUID NOT NULL REFERENCES media_items(id) ON DELETE CASCADE,
        number INTEGER NOT NULL,
        title TEXT,
        overview TEXT,
        poster_url TEXT,
        air_date DATE,
        episode_count INTEGER,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (media_item_id, number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS episodes (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        season_id UUID NOT NULL REFERENCES seasons(id) ON DELETE CASCADE,
        number INTEGER NOT NULL,
        title TEXT,
        overview TEXT,
        air_date DATE,
        runtime INTEGER,
        still_url TEXT,
        rating DOUBLE PRECISION,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (season_id, number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS genres (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media_genres (
        media_item_id UUID NOT NULL REFERENCES media_items(id) ON DELETE CASCADE,
        genre_id UUID NOT NULL REFERENCES genres(id) ON DELETE CASCADE,
        PRIMARY KEY (media_item_id, genre_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS queue_entries (
        id BIGSERIAL PRIMARY KEY,
        queue TEXT NOT NULL,
        list TEXT NOT NULL,
        position BIGINT NOT NULL,
        payload TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_queue_entries_order
        ON queue_entries (queue, list, position)
    "#,
];

/// Create all tables and indexes if they do not already exist
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to apply schema statement")?;
    }
    debug!("Database schema verified");
    Ok(())
}
