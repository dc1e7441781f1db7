//! End-to-end pipeline tests
//!
//! Self-contained: a scripted provider and in-memory store, queue, and
//! tracker stand in for the network and the database. Each test drives the
//! real orchestrator over a real temporary directory tree.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use curator::db::{LibraryRecord, ScanStatus};
use curator::services::{
    EpisodeMetadata, ImageSet, JobQueue, JobQueueConfig, MediaKind, MemoryIngestStore,
    MemoryQueueStore, MemoryScanTracker, MetadataCache, MetadataJobProcessor, MetadataProvider,
    PathScanner, ProviderError, ProviderMetadata, ProviderRegistry, ScanOrchestrator, SearchHit,
    SeasonMetadata, TMDB_NAMESPACE,
};

/// Scripted catalog: fixed metadata per id, optionally failing the first N
/// calls to exercise the retry path
struct ScriptedCatalog {
    items: HashMap<i64, ProviderMetadata>,
    seasons: HashMap<(i64, i32), SeasonMetadata>,
    search_index: Vec<SearchHit>,
    fail_first: usize,
    calls: AtomicUsize,
}

impl ScriptedCatalog {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            seasons: HashMap::new(),
            search_index: Vec::new(),
            fail_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_movie(mut self, tmdb_id: i64, title: &str) -> Self {
        self.items.insert(
            tmdb_id,
            ProviderMetadata {
                tmdb_id,
                kind: MediaKind::Movie,
                title: title.to_string(),
                overview: Some(format!("{} overview", title)),
                release_date: None,
                rating: Some(7.0),
                genres: vec!["Drama".to_string()],
                poster_url: Some(format!("http://img/{}.jpg", tmdb_id)),
                backdrop_url: None,
                logo_url: None,
                textless_poster_url: None,
                imdb_id: None,
                tvdb_id: None,
                season_count: None,
            },
        );
        self
    }

    fn with_show(mut self, tmdb_id: i64, title: &str, seasons: i32) -> Self {
        self.items.insert(
            tmdb_id,
            ProviderMetadata {
                tmdb_id,
                kind: MediaKind::Show,
                title: title.to_string(),
                overview: Some(format!("{} overview", title)),
                release_date: None,
                rating: Some(8.0),
                genres: vec!["Sci-Fi".to_string()],
                poster_url: Some(format!("http://img/{}.jpg", tmdb_id)),
                backdrop_url: None,
                logo_url: None,
                textless_poster_url: None,
                imdb_id: None,
                tvdb_id: None,
                season_count: Some(seasons),
            },
        );
        for number in 1..=seasons {
            self.seasons.insert(
                (tmdb_id, number),
                SeasonMetadata {
                    season_number: number,
                    title: Some(format!("Season {}", number)),
                    overview: None,
                    air_date: None,
                    poster_url: None,
                    episodes: vec![EpisodeMetadata {
                        season_number: number,
                        episode_number: 1,
                        title: Some("Pilot".to_string()),
                        overview: None,
                        air_date: None,
                        runtime: Some(45),
                        still_url: None,
                        rating: None,
                    }],
                },
            );
        }
        self
    }

    fn searchable(mut self, tmdb_id: i64, title: &str, year: Option<i32>) -> Self {
        self.search_index.push(SearchHit {
            tmdb_id,
            title: title.to_string(),
            year,
            overview: None,
        });
        self
    }

    fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }
}

#[async_trait]
impl MetadataProvider for ScriptedCatalog {
    async fn search(
        &self,
        _kind: MediaKind,
        title: &str,
        _year: Option<i32>,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let needle = title.to_lowercase();
        Ok(self
            .search_index
            .iter()
            .filter(|h| h.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, _kind: MediaKind, id: i64) -> Result<ProviderMetadata, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ProviderError::Provider {
                status: 503,
                message: "temporarily unavailable".to_string(),
            });
        }
        self.items.get(&id).cloned().ok_or(ProviderError::NotFound)
    }

    async fn get_season(
        &self,
        show_id: i64,
        season_number: i32,
    ) -> Result<SeasonMetadata, ProviderError> {
        self.seasons
            .get(&(show_id, season_number))
            .cloned()
            .ok_or(ProviderError::NotFound)
    }

    async fn get_episode(
        &self,
        show_id: i64,
        season_number: i32,
        episode_number: i32,
    ) -> Result<EpisodeMetadata, ProviderError> {
        self.seasons
            .get(&(show_id, season_number))
            .and_then(|s| s.episodes.iter().find(|e| e.episode_number == episode_number))
            .cloned()
            .ok_or(ProviderError::NotFound)
    }

    async fn get_images(&self, _kind: MediaKind, _id: i64) -> Result<ImageSet, ProviderError> {
        Ok(ImageSet::default())
    }
}

struct Pipeline {
    orchestrator: ScanOrchestrator,
    store: Arc<MemoryIngestStore>,
    queue: Arc<JobQueue>,
    processor: MetadataJobProcessor,
    library: LibraryRecord,
}

fn pipeline(catalog: ScriptedCatalog, root: &Path, kind: &str) -> Pipeline {
    let mut registry = ProviderRegistry::new();
    registry.register(TMDB_NAMESPACE, Arc::new(catalog));
    let registry = Arc::new(registry);

    let library = LibraryRecord {
        id: Uuid::new_v4(),
        name: "Test Library".to_string(),
        root_path: root.to_string_lossy().to_string(),
        kind: kind.to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let store = Arc::new(MemoryIngestStore::with_library(library.id));
    let cache = Arc::new(MetadataCache::new());
    let queue = Arc::new(JobQueue::new(
        Arc::new(MemoryQueueStore::new()),
        JobQueueConfig {
            retry_base: Duration::from_millis(10),
            consume_timeout: Duration::from_millis(50),
            ..JobQueueConfig::default()
        },
    ));

    let processor = MetadataJobProcessor::new(registry.clone(), store.clone(), cache.clone(), None);

    let orchestrator = ScanOrchestrator::new(
        PathScanner::new(6, &["mkv".to_string(), "mp4".to_string()]),
        registry,
        cache,
        store.clone(),
        queue.clone(),
        Arc::new(MemoryScanTracker::new()),
    );

    Pipeline { orchestrator, store, queue, processor, library }
}

#[tokio::test]
async fn test_mixed_movie_library_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("First Movie {tmdb-100}.mkv"), b"x").unwrap();
    fs::write(dir.path().join("Second Movie {tmdb-200}.mp4"), b"x").unwrap();
    fs::write(dir.path().join("Second Movie {tmdb-200}.srt"), b"x").unwrap();
    fs::write(dir.path().join("Thumbs.db"), b"x").unwrap();

    let catalog = ScriptedCatalog::new()
        .with_movie(100, "First Movie")
        .with_movie(200, "Second Movie");
    let p = pipeline(catalog, dir.path(), "movie");

    let summary = p.orchestrator.scan_library(&p.library, false).await.unwrap();

    assert_eq!(summary.status, ScanStatus::Completed);
    assert_eq!(summary.discovered, 2, "sidecar and OS artifact filtered out");
    assert_eq!(summary.items, 2);
    assert_eq!(summary.saved, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.network_fetches, 2);
    assert_eq!(p.store.item_count(), 2);

    let first = p.store.get(p.library.id, MediaKind::Movie, 100).unwrap();
    assert_eq!(first.metadata.title, "First Movie");
    assert!(first.path.is_some());
}

#[tokio::test]
async fn test_show_library_persists_hierarchy() {
    let dir = tempfile::tempdir().unwrap();
    let show = dir.path().join("Space Show {tmdb-300}");
    fs::create_dir(&show).unwrap();
    fs::write(show.join("Space.Show.S01E01.mkv"), b"x").unwrap();
    fs::write(show.join("Space.Show.S02E01.mkv"), b"x").unwrap();

    let catalog = ScriptedCatalog::new().with_show(300, "Space Show", 2);
    let p = pipeline(catalog, dir.path(), "show");

    let summary = p.orchestrator.scan_library(&p.library, false).await.unwrap();

    assert_eq!(summary.items, 1, "episode files collapse to one show");
    assert_eq!(summary.saved, 1);
    let stored = p.store.get(p.library.id, MediaKind::Show, 300).unwrap();
    assert_eq!(stored.seasons.len(), 2);
    assert_eq!(stored.seasons[0].episodes.len(), 1);
}

#[tokio::test]
async fn test_deferred_item_recovered_by_queue_worker() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Flaky Movie {tmdb-400}.mkv"), b"x").unwrap();

    // First provider call fails transiently; the retry succeeds
    let catalog = ScriptedCatalog::new()
        .with_movie(400, "Flaky Movie")
        .failing_first(1);
    let p = pipeline(catalog, dir.path(), "movie");

    let summary = p.orchestrator.scan_library(&p.library, false).await.unwrap();
    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.saved, 0);
    assert_eq!(p.queue.pending().await.unwrap(), 1);

    // Drain the queue the way a worker would
    assert!(p.queue.handle_one(&p.processor).await.unwrap());
    assert_eq!(p.queue.pending().await.unwrap(), 0);
    assert_eq!(p.queue.in_flight().await.unwrap(), 0);
    assert_eq!(p.store.item_count(), 1);
}

#[tokio::test]
async fn test_rescan_skips_persisted_items() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Stable Movie {tmdb-500}.mkv"), b"x").unwrap();

    let catalog = ScriptedCatalog::new().with_movie(500, "Stable Movie");
    let p = pipeline(catalog, dir.path(), "movie");

    let first = p.orchestrator.scan_library(&p.library, false).await.unwrap();
    assert_eq!(first.network_fetches, 1);
    assert_eq!(first.saved, 1);

    let second = p.orchestrator.scan_library(&p.library, false).await.unwrap();
    assert_eq!(second.network_fetches, 0, "complete item must not be re-fetched");
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.saved, 0);

    assert_eq!(p.store.item_count(), 1);
    assert_eq!(p.store.save_calls(), 1);
}

#[tokio::test]
async fn test_search_fallback_for_untagged_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Quiet Film (2018).mkv"), b"x").unwrap();

    let catalog = ScriptedCatalog::new()
        .with_movie(600, "Quiet Film")
        .searchable(600, "Quiet Film", Some(2018));
    let p = pipeline(catalog, dir.path(), "movie");

    let summary = p.orchestrator.scan_library(&p.library, false).await.unwrap();

    assert_eq!(summary.saved, 1);
    assert!(p.store.get(p.library.id, MediaKind::Movie, 600).is_some());
}

#[tokio::test]
async fn test_empty_library_completes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = ScriptedCatalog::new();
    let p = pipeline(catalog, dir.path(), "movie");

    let summary = p.orchestrator.scan_library(&p.library, false).await.unwrap();

    assert_eq!(summary.status, ScanStatus::Completed);
    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.saved, 0);
    assert_eq!(p.store.item_count(), 0);
}
