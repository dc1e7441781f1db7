//! Database connection and operations

pub mod genres;
pub mod hierarchy;
pub mod libraries;
pub mod media;
pub mod queue;
pub mod scan_jobs;
pub mod schema;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use genres::{GenreRecord, GenreRepository};
pub use hierarchy::{
    EpisodeRecord, HierarchyRepository, SeasonRecord, UpsertEpisode, UpsertSeason,
};
pub use libraries::{CreateLibrary, LibraryRecord, LibraryRepository};
pub use media::{MediaItemRecord, MediaRepository, UpsertMediaItem};
pub use queue::PgQueueStore;
pub use scan_jobs::{ScanJobRecord, ScanJobRepository, ScanStatus};
pub use schema::ensure_schema;

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str) -> Result<Self> {
        let max_connections = Self::get_max_connections();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a library repository
    pub fn libraries(&self) -> LibraryRepository {
        LibraryRepository::new(self.pool.clone())
    }

    /// Get a scan job repository
    pub fn scan_jobs(&self) -> ScanJobRepository {
        ScanJobRepository::new(self.pool.clone())
    }

    /// Get a media repository
    pub fn media(&self) -> MediaRepository {
        MediaRepository::new(self.pool.clone())
    }

    /// Get a season/episode repository
    pub fn hierarchy(&self) -> HierarchyRepository {
        HierarchyRepository::new(self.pool.clone())
    }

    /// Get a genre repository
    pub fn genres(&self) -> GenreRepository {
        GenreRepository::new(self.pool.clone())
    }

    /// Get a database-backed queue store
    pub fn queue_store(&self) -> PgQueueStore {
        PgQueueStore::new(self.pool.clone())
    }

    /// Create all tables if they do not already exist
    pub async fn ensure_schema(&self) -> Result<()> {
        schema::ensure_schema(&self.pool).await
    }
}
