//! Idempotent metadata persistence
//!
//! Everything the fetch pipeline saves goes through [`IngestStore`]. Items
//! are canonical: one row per (kind, external id) no matter how many
//! libraries contain the file, with per-library membership tracked
//! separately. Saving the same item twice refreshes it; duplicates cannot
//! exist. The database implementation also caches artwork to local disk and
//! records where it landed.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{Database, UpsertEpisode, UpsertMediaItem, UpsertSeason};

use super::artwork::{ArtworkCache, ArtworkKind};
use super::provider::{MediaKind, ProviderMetadata, SeasonMetadata, TMDB_NAMESPACE};

/// One resolved item ready to persist
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub library_id: Uuid,
    pub metadata: Arc<ProviderMetadata>,
    /// Show hierarchy, empty for movies
    pub seasons: Vec<SeasonMetadata>,
    pub path: Option<PathBuf>,
    pub size_bytes: Option<i64>,
}

/// Persistence seam for the pipeline
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Idempotent save of one item and its hierarchy
    async fn save(&self, item: &IngestItem) -> Result<()>;

    /// External ids in a library whose persisted metadata is already
    /// complete (title, overview, at least one artwork slot)
    async fn complete_ids(&self, library_id: Uuid, kind: MediaKind) -> Result<Vec<i64>>;

    /// Whether a save target still exists; false lets queued work for a
    /// deleted library be skipped instead of retried
    async fn library_exists(&self, library_id: Uuid) -> Result<bool>;
}

/// Database-backed [`IngestStore`] with local artwork caching
pub struct PgIngestStore {
    db: Database,
    artwork: Arc<ArtworkCache>,
}

impl PgIngestStore {
    pub fn new(db: Database, artwork: Arc<ArtworkCache>) -> Self {
        Self { db, artwork }
    }

    fn external_refs(metadata: &ProviderMetadata) -> Vec<(String, String)> {
        let mut refs = Vec::new();
        if let Some(imdb_id) = &metadata.imdb_id {
            refs.push(("imdb".to_string(), imdb_id.clone()));
        }
        if let Some(tvdb_id) = metadata.tvdb_id {
            refs.push(("tvdb".to_string(), tvdb_id.to_string()));
        }
        refs
    }

    async fn save_hierarchy(&self, media_item_id: Uuid, seasons: &[SeasonMetadata]) -> Result<()> {
        let repo = self.db.hierarchy();
        for season in seasons {
            let record = repo
                .upsert_season(UpsertSeason {
                    media_item_id,
                    number: season.season_number,
                    title: season.title.clone(),
                    overview: season.overview.clone(),
                    poster_url: season.poster_url.clone(),
                    air_date: season.air_date,
                    episode_count: Some(season.episodes.len() as i32),
                })
                .await?;

            for episode in &season.episodes {
                repo.upsert_episode(UpsertEpisode {
                    season_id: record.id,
                    number: episode.episode_number,
                    title: episode.title.clone(),
                    overview: episode.overview.clone(),
                    air_date: episode.air_date,
                    runtime: episode.runtime,
                    still_url: episode.still_url.clone(),
                    rating: episode.rating,
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn cache_artwork(&self, media_item_id: Uuid, metadata: &ProviderMetadata) -> Result<()> {
        let entity = media_item_id.to_string();
        let poster = self
            .artwork
            .cache_image_optional(metadata.poster_url.as_deref(), ArtworkKind::Poster, &entity)
            .await;
        let backdrop = self
            .artwork
            .cache_image_optional(
                metadata.backdrop_url.as_deref(),
                ArtworkKind::Backdrop,
                &entity,
            )
            .await;

        if poster.is_some() || backdrop.is_some() {
            self.db
                .media()
                .set_artwork_paths(
                    media_item_id,
                    poster.as_deref().and_then(|p| p.to_str()),
                    backdrop.as_deref().and_then(|p| p.to_str()),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl IngestStore for PgIngestStore {
    async fn save(&self, item: &IngestItem) -> Result<()> {
        let metadata = &item.metadata;

        let record = self
            .db
            .media()
            .upsert(UpsertMediaItem {
                library_id: item.library_id,
                kind: metadata.kind,
                tmdb_id: metadata.tmdb_id,
                title: metadata.title.clone(),
                overview: metadata.overview.clone(),
                release_date: metadata.release_date,
                rating: metadata.rating,
                poster_url: metadata.poster_url.clone(),
                backdrop_url: metadata.backdrop_url.clone(),
                logo_url: metadata.logo_url.clone(),
                textless_poster_url: metadata.textless_poster_url.clone(),
                path: item.path.as_ref().and_then(|p| p.to_str()).map(String::from),
                size_bytes: item.size_bytes,
                season_count: metadata.season_count,
                external_refs: Self::external_refs(metadata),
            })
            .await?;

        if !metadata.genres.is_empty() {
            self.db.genres().set_for_media(record.id, &metadata.genres).await?;
        }

        // The kind decides the persistence shape exactly once per item
        match metadata.kind {
            MediaKind::Movie => {
                if !item.seasons.is_empty() {
                    warn!(tmdb_id = metadata.tmdb_id, "Ignoring season data on a movie");
                }
            }
            MediaKind::Show => {
                self.save_hierarchy(record.id, &item.seasons).await?;
            }
        }

        self.cache_artwork(record.id, metadata).await?;

        info!(
            source = TMDB_NAMESPACE,
            tmdb_id = metadata.tmdb_id,
            kind = %metadata.kind,
            title = %metadata.title,
            "Saved media item"
        );
        Ok(())
    }

    async fn complete_ids(&self, library_id: Uuid, kind: MediaKind) -> Result<Vec<i64>> {
        self.db.media().complete_tmdb_ids(library_id, kind).await
    }

    async fn library_exists(&self, library_id: Uuid) -> Result<bool> {
        Ok(self.db.libraries().get_by_id(library_id).await?.is_some())
    }
}

/// In-memory [`IngestStore`] for tests: same canonical-key semantics,
/// nothing persisted anywhere
#[derive(Default)]
pub struct MemoryIngestStore {
    items: parking_lot::Mutex<HashMap<(MediaKind, i64), IngestItem>>,
    memberships: parking_lot::Mutex<HashSet<(Uuid, MediaKind, i64)>>,
    libraries: parking_lot::Mutex<Vec<Uuid>>,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryIngestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(library_id: Uuid) -> Self {
        let store = Self::default();
        store.libraries.lock().push(library_id);
        store
    }

    pub fn add_library(&self, library_id: Uuid) {
        self.libraries.lock().push(library_id);
    }

    /// Distinct canonical items currently stored
    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    /// Total save calls, counting idempotent re-saves
    pub fn save_calls(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Canonical item, visible only through a library it is a member of
    pub fn get(&self, library_id: Uuid, kind: MediaKind, tmdb_id: i64) -> Option<IngestItem> {
        if !self.memberships.lock().contains(&(library_id, kind, tmdb_id)) {
            return None;
        }
        self.items.lock().get(&(kind, tmdb_id)).cloned()
    }
}

#[async_trait]
impl IngestStore for MemoryIngestStore {
    async fn save(&self, item: &IngestItem) -> Result<()> {
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let kind = item.metadata.kind;
        let tmdb_id = item.metadata.tmdb_id;
        self.items.lock().insert((kind, tmdb_id), item.clone());
        self.memberships.lock().insert((item.library_id, kind, tmdb_id));
        Ok(())
    }

    async fn complete_ids(&self, library_id: Uuid, kind: MediaKind) -> Result<Vec<i64>> {
        let memberships = self.memberships.lock();
        Ok(self
            .items
            .lock()
            .iter()
            .filter(|((k, tmdb_id), item)| {
                *k == kind
                    && memberships.contains(&(library_id, kind, *tmdb_id))
                    && item.metadata.overview.is_some()
                    && (item.metadata.poster_url.is_some()
                        || item.metadata.backdrop_url.is_some())
            })
            .map(|((_, tmdb_id), _)| *tmdb_id)
            .collect())
    }

    async fn library_exists(&self, library_id: Uuid) -> Result<bool> {
        Ok(self.libraries.lock().contains(&library_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(tmdb_id: i64, kind: MediaKind) -> Arc<ProviderMetadata> {
        Arc::new(ProviderMetadata {
            tmdb_id,
            kind,
            title: format!("Item {}", tmdb_id),
            overview: Some("An overview".to_string()),
            release_date: None,
            rating: Some(7.5),
            genres: vec!["Drama".to_string()],
            poster_url: Some("http://img/poster.jpg".to_string()),
            backdrop_url: None,
            logo_url: None,
            textless_poster_url: None,
            imdb_id: None,
            tvdb_id: None,
            season_count: None,
        })
    }

    #[tokio::test]
    async fn test_memory_store_resave_is_idempotent() {
        let library_id = Uuid::new_v4();
        let store = MemoryIngestStore::with_library(library_id);
        let item = IngestItem {
            library_id,
            metadata: metadata(42, MediaKind::Movie),
            seasons: vec![],
            path: None,
            size_bytes: None,
        };

        store.save(&item).await.unwrap();
        store.save(&item).await.unwrap();

        assert_eq!(store.item_count(), 1);
        assert_eq!(store.save_calls(), 2);
    }

    #[tokio::test]
    async fn test_complete_ids_require_overview_and_artwork() {
        let library_id = Uuid::new_v4();
        let store = MemoryIngestStore::with_library(library_id);

        store
            .save(&IngestItem {
                library_id,
                metadata: metadata(1, MediaKind::Movie),
                seasons: vec![],
                path: None,
                size_bytes: None,
            })
            .await
            .unwrap();

        let mut bare = (*metadata(2, MediaKind::Movie)).clone();
        bare.overview = None;
        store
            .save(&IngestItem {
                library_id,
                metadata: Arc::new(bare),
                seasons: vec![],
                path: None,
                size_bytes: None,
            })
            .await
            .unwrap();

        let ids = store.complete_ids(library_id, MediaKind::Movie).await.unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_same_external_id_is_one_canonical_item_across_libraries() {
        let movies = Uuid::new_v4();
        let extras = Uuid::new_v4();
        let unrelated = Uuid::new_v4();
        let store = MemoryIngestStore::with_library(movies);
        store.add_library(extras);

        for library_id in [movies, extras] {
            store
                .save(&IngestItem {
                    library_id,
                    metadata: metadata(42, MediaKind::Movie),
                    seasons: vec![],
                    path: None,
                    size_bytes: None,
                })
                .await
                .unwrap();
        }

        // Same external id in two libraries collapses to one canonical item
        assert_eq!(store.item_count(), 1);
        assert!(store.get(movies, MediaKind::Movie, 42).is_some());
        assert!(store.get(extras, MediaKind::Movie, 42).is_some());
        // Membership is per library, not global visibility
        assert!(store.get(unrelated, MediaKind::Movie, 42).is_none());
    }
}
