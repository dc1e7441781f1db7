//! Queued metadata fetch jobs
//!
//! The durable queue carries opaque JSON; this module gives it a type. Each
//! job resolves one external id against the provider and persists the
//! result. Failure classification follows the provider error taxonomy:
//! transient failures retry with backoff, a missing catalog entry is
//! terminal, and a job whose save target no longer exists is skipped.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::ScanJobRepository;

use super::cache::{CacheEntry, CacheKey, MetadataCache};
use super::job_queue::{decode_job, JobOutcome, JobProcessor};
use super::persistence::{IngestItem, IngestStore};
use super::provider::{MediaKind, ProviderError, ProviderRegistry, SeasonMetadata};

/// One queued fetch: resolve an external id and persist the result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFetchJob {
    pub library_id: Uuid,
    pub kind: MediaKind,
    pub tmdb_id: i64,
    /// Provider name in the registry
    pub source: String,
    pub path: Option<PathBuf>,
    pub size_bytes: Option<i64>,
}

/// Processes [`MetadataFetchJob`] payloads from the work queue
pub struct MetadataJobProcessor {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn IngestStore>,
    cache: Arc<MetadataCache>,
    /// Present when scan counters should track queued completions
    scan_jobs: Option<ScanJobRepository>,
}

impl MetadataJobProcessor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn IngestStore>,
        cache: Arc<MetadataCache>,
        scan_jobs: Option<ScanJobRepository>,
    ) -> Self {
        Self { registry, store, cache, scan_jobs }
    }

    async fn count_processed(&self, library_id: Uuid) {
        if let Some(repo) = &self.scan_jobs {
            // A retried job may outlive its scan; only active runs count
            if let Err(e) = repo.increment_processed(library_id).await {
                warn!(error = %e, "Failed to update scan counters");
            }
        }
    }

    async fn count_failed(&self, library_id: Uuid) {
        if let Some(repo) = &self.scan_jobs {
            if let Err(e) = repo.increment_failed(library_id).await {
                warn!(error = %e, "Failed to update scan counters");
            }
        }
    }

    async fn run(&self, job: MetadataFetchJob) -> JobOutcome {
        // A deleted library makes the job pointless, not failed
        match self.store.library_exists(job.library_id).await {
            Ok(true) => {}
            Ok(false) => {
                return JobOutcome::Discard(format!(
                    "library {} no longer exists",
                    job.library_id
                ));
            }
            Err(e) => return JobOutcome::Retry(format!("store check failed: {e}")),
        }

        let key = CacheKey { kind: job.kind, tmdb_id: job.tmdb_id };
        if matches!(self.cache.get(&key), Some(CacheEntry::Persisted)) {
            return JobOutcome::Discard("already persisted with complete metadata".to_string());
        }

        let provider = match self.registry.get(&job.source) {
            Some(provider) => provider,
            None => {
                return JobOutcome::Discard(format!("unknown provider '{}'", job.source));
            }
        };

        let metadata = match self.cache.get(&key) {
            Some(CacheEntry::Fetched(metadata)) => metadata,
            _ => match provider.get_by_id(job.kind, job.tmdb_id).await {
                Ok(mut metadata) => {
                    enrich_with_images(&*provider, &mut metadata).await;
                    let metadata = Arc::new(metadata);
                    self.cache.put(key, metadata.clone());
                    metadata
                }
                Err(ProviderError::NotFound) => {
                    warn!(tmdb_id = job.tmdb_id, kind = %job.kind, "Catalog entry not found, giving up");
                    self.count_failed(job.library_id).await;
                    return JobOutcome::Discard("catalog entry not found".to_string());
                }
                Err(e) if e.is_retryable() => {
                    return JobOutcome::Retry(e.to_string());
                }
                Err(e) => {
                    self.count_failed(job.library_id).await;
                    return JobOutcome::Discard(e.to_string());
                }
            },
        };

        let seasons = if metadata.kind == MediaKind::Show {
            match fetch_seasons(&*provider, metadata.tmdb_id, metadata.season_count).await {
                Ok(seasons) => seasons,
                Err(e) if e.is_retryable() => return JobOutcome::Retry(e.to_string()),
                Err(e) => {
                    // Keep the show itself even when hierarchy fetch fails
                    warn!(tmdb_id = metadata.tmdb_id, error = %e, "Season fetch failed, saving show without hierarchy");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let item = IngestItem {
            library_id: job.library_id,
            metadata,
            seasons,
            path: job.path,
            size_bytes: job.size_bytes,
        };

        match self.store.save(&item).await {
            Ok(()) => {
                self.count_processed(job.library_id).await;
                info!(tmdb_id = job.tmdb_id, kind = %job.kind, "Queued metadata fetch completed");
                JobOutcome::Done
            }
            Err(e) => JobOutcome::Retry(format!("save failed: {e}")),
        }
    }
}

/// Fill artwork slots the detail lookup left empty from the provider's
/// image endpoint. Logos and textless posters only exist there, so every
/// fresh fetch goes through this. Image lookup failures degrade to the
/// detail artwork rather than failing the item.
pub async fn enrich_with_images(
    provider: &dyn super::provider::MetadataProvider,
    metadata: &mut super::provider::ProviderMetadata,
) {
    match provider.get_images(metadata.kind, metadata.tmdb_id).await {
        Ok(images) => {
            if metadata.poster_url.is_none() {
                metadata.poster_url = images.poster_url;
            }
            if metadata.backdrop_url.is_none() {
                metadata.backdrop_url = images.backdrop_url;
            }
            if metadata.logo_url.is_none() {
                metadata.logo_url = images.logo_url;
            }
            if metadata.textless_poster_url.is_none() {
                metadata.textless_poster_url = images.textless_poster_url;
            }
        }
        Err(e) => {
            warn!(tmdb_id = metadata.tmdb_id, error = %e, "Image lookup failed, keeping detail artwork");
        }
    }
}

/// Fetch every numbered season of a show, oldest first. Specials (season 0)
/// are not requested.
pub async fn fetch_seasons(
    provider: &dyn super::provider::MetadataProvider,
    tmdb_id: i64,
    season_count: Option<i32>,
) -> Result<Vec<SeasonMetadata>, ProviderError> {
    let count = season_count.unwrap_or(0).max(0);
    let mut seasons = Vec::with_capacity(count as usize);
    for number in 1..=count {
        match provider.get_season(tmdb_id, number).await {
            Ok(season) => seasons.push(season),
            // A gap in numbering is common; skip it
            Err(ProviderError::NotFound) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(seasons)
}

#[async_trait]
impl JobProcessor for MetadataJobProcessor {
    async fn process(&self, job: serde_json::Value) -> JobOutcome {
        let job: MetadataFetchJob = match decode_job(job) {
            Ok(job) => job,
            Err(e) => return JobOutcome::Discard(format!("undecodable job: {e}")),
        };
        self.run(job).await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use assert_matches::assert_matches;

    use super::super::persistence::MemoryIngestStore;
    use super::super::provider::{
        EpisodeMetadata, ImageSet, MetadataProvider, ProviderMetadata, SearchHit,
    };
    use super::*;

    struct StubProvider {
        result: std::result::Result<ProviderMetadata, ProviderError>,
        images: ImageSet,
    }

    fn movie(tmdb_id: i64) -> ProviderMetadata {
        ProviderMetadata {
            tmdb_id,
            kind: MediaKind::Movie,
            title: "Stub Movie".to_string(),
            overview: Some("overview".to_string()),
            release_date: None,
            rating: None,
            genres: vec![],
            poster_url: None,
            backdrop_url: None,
            logo_url: None,
            textless_poster_url: None,
            imdb_id: None,
            tvdb_id: None,
            season_count: None,
        }
    }

    #[async_trait]
    impl MetadataProvider for StubProvider {
        async fn search(
            &self,
            _kind: MediaKind,
            _title: &str,
            _year: Option<i32>,
        ) -> std::result::Result<Vec<SearchHit>, ProviderError> {
            Ok(vec![])
        }

        async fn get_by_id(
            &self,
            _kind: MediaKind,
            _id: i64,
        ) -> std::result::Result<ProviderMetadata, ProviderError> {
            self.result.clone()
        }

        async fn get_season(
            &self,
            _show_id: i64,
            _season_number: i32,
        ) -> std::result::Result<SeasonMetadata, ProviderError> {
            Err(ProviderError::NotFound)
        }

        async fn get_episode(
            &self,
            _show_id: i64,
            _season_number: i32,
            _episode_number: i32,
        ) -> std::result::Result<EpisodeMetadata, ProviderError> {
            Err(ProviderError::NotFound)
        }

        async fn get_images(
            &self,
            _kind: MediaKind,
            _id: i64,
        ) -> std::result::Result<ImageSet, ProviderError> {
            Ok(self.images.clone())
        }
    }

    fn processor(
        result: std::result::Result<ProviderMetadata, ProviderError>,
        library_id: Uuid,
    ) -> (MetadataJobProcessor, Arc<MemoryIngestStore>) {
        processor_with_images(result, ImageSet::default(), library_id)
    }

    fn processor_with_images(
        result: std::result::Result<ProviderMetadata, ProviderError>,
        images: ImageSet,
        library_id: Uuid,
    ) -> (MetadataJobProcessor, Arc<MemoryIngestStore>) {
        let mut registry = ProviderRegistry::new();
        registry.register("stub", Arc::new(StubProvider { result, images }));
        let store = Arc::new(MemoryIngestStore::with_library(library_id));
        let processor = MetadataJobProcessor::new(
            Arc::new(registry),
            store.clone(),
            Arc::new(MetadataCache::new()),
            None,
        );
        (processor, store)
    }

    fn job(library_id: Uuid) -> MetadataFetchJob {
        MetadataFetchJob {
            library_id,
            kind: MediaKind::Movie,
            tmdb_id: 42,
            source: "stub".to_string(),
            path: None,
            size_bytes: None,
        }
    }

    #[tokio::test]
    async fn test_successful_fetch_saves_and_completes() -> Result<()> {
        let library_id = Uuid::new_v4();
        let (processor, store) = processor(Ok(movie(42)), library_id);

        let outcome = processor.run(job(library_id)).await;
        assert_matches!(outcome, JobOutcome::Done);
        assert_eq!(store.item_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_image_lookup_fills_missing_artwork() -> Result<()> {
        let library_id = Uuid::new_v4();
        let images = ImageSet {
            poster_url: Some("http://img/poster.jpg".to_string()),
            backdrop_url: None,
            logo_url: Some("http://img/logo.png".to_string()),
            textless_poster_url: Some("http://img/textless.jpg".to_string()),
        };
        let (processor, store) = processor_with_images(Ok(movie(42)), images, library_id);

        let outcome = processor.run(job(library_id)).await;
        assert_matches!(outcome, JobOutcome::Done);

        let saved = store.get(library_id, MediaKind::Movie, 42).unwrap();
        assert_eq!(saved.metadata.poster_url.as_deref(), Some("http://img/poster.jpg"));
        assert_eq!(saved.metadata.logo_url.as_deref(), Some("http://img/logo.png"));
        assert_eq!(
            saved.metadata.textless_poster_url.as_deref(),
            Some("http://img/textless.jpg")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_not_found_is_terminal() {
        let library_id = Uuid::new_v4();
        let (processor, store) = processor(Err(ProviderError::NotFound), library_id);

        let outcome = processor.run(job(library_id)).await;
        assert_matches!(outcome, JobOutcome::Discard(_));
        assert_eq!(store.item_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retries() {
        let library_id = Uuid::new_v4();
        let (processor, _) = processor(
            Err(ProviderError::Provider { status: 503, message: "overloaded".to_string() }),
            library_id,
        );

        let outcome = processor.run(job(library_id)).await;
        assert_matches!(outcome, JobOutcome::Retry(_));
    }

    #[tokio::test]
    async fn test_deleted_library_skips_without_fetch() {
        let library_id = Uuid::new_v4();
        // Store knows no libraries at all
        let (processor, store) = processor(Ok(movie(42)), Uuid::new_v4());

        let outcome = processor.run(job(library_id)).await;
        assert_matches!(outcome, JobOutcome::Discard(_));
        assert_eq!(store.item_count(), 0);
    }
}
