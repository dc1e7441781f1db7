//! Scan orchestration
//!
//! Drives one library scan end to end through four phases: scan entries on
//! disk, resolve each unique external id against the provider, fetch episode
//! hierarchies for shows, and persist the results, finishing with a terminal
//! complete event. Provider lookups within a fetch phase run as concurrent
//! tasks; the rate-limited dispatcher inside the provider bounds how many are
//! on the wire at once, and each phase collects every outcome before the next
//! begins. Per-item failures are counted and logged, never fatal; transient
//! provider failures are handed to the durable queue instead of blocking the
//! scan. Before admitting each task the orchestrator observes the scan job's
//! status, so an externally requested pause or failure stops new admissions
//! without interrupting in-flight work.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{LibraryRecord, ScanJobRepository, ScanStatus};

use super::cache::{CacheEntry, CacheKey, MetadataCache};
use super::job_queue::JobQueue;
use super::metadata_jobs::{enrich_with_images, fetch_seasons, MetadataFetchJob};
use super::persistence::{IngestItem, IngestStore};
use super::progress::{ProgressReporter, ScanPhase, ScanProgressEvent};
use super::provider::{
    MediaKind, MetadataProvider, ProviderError, ProviderRegistry, SeasonMetadata, TMDB_NAMESPACE,
};
use super::scanner::{PathScanner, ScannedEntry};

/// Scan job state the orchestrator reads and writes
#[async_trait]
pub trait ScanTracker: Send + Sync {
    /// Create a pending scan job, returning its id
    async fn begin(&self, library_id: Uuid) -> Result<Uuid>;

    /// Mark the job running with its discovered item total
    async fn mark_started(&self, scan_job_id: Uuid, total: i32) -> Result<()>;

    /// Current status, as possibly changed by an external writer
    async fn status(&self, scan_job_id: Uuid) -> Result<ScanStatus>;

    async fn item_processed(&self, library_id: Uuid) -> Result<()>;

    async fn item_failed(&self, library_id: Uuid) -> Result<()>;

    async fn set_metadata_status(&self, scan_job_id: Uuid, status: &str) -> Result<()>;

    async fn finish(&self, scan_job_id: Uuid, status: ScanStatus) -> Result<()>;
}

/// Database-backed tracker over the scan job repository
pub struct PgScanTracker {
    repo: ScanJobRepository,
}

impl PgScanTracker {
    pub fn new(repo: ScanJobRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ScanTracker for PgScanTracker {
    async fn begin(&self, library_id: Uuid) -> Result<Uuid> {
        Ok(self.repo.create(library_id).await?.id)
    }

    async fn mark_started(&self, scan_job_id: Uuid, total: i32) -> Result<()> {
        self.repo.mark_started(scan_job_id, total).await
    }

    async fn status(&self, scan_job_id: Uuid) -> Result<ScanStatus> {
        let record = self.repo.get_by_id(scan_job_id).await?;
        // A deleted job row means the run was discarded externally
        Ok(record
            .and_then(|r| r.scan_status())
            .unwrap_or(ScanStatus::Cancelled))
    }

    async fn item_processed(&self, library_id: Uuid) -> Result<()> {
        self.repo.increment_processed(library_id).await?;
        Ok(())
    }

    async fn item_failed(&self, library_id: Uuid) -> Result<()> {
        self.repo.increment_failed(library_id).await?;
        Ok(())
    }

    async fn set_metadata_status(&self, scan_job_id: Uuid, status: &str) -> Result<()> {
        self.repo.set_metadata_status(scan_job_id, status).await
    }

    async fn finish(&self, scan_job_id: Uuid, status: ScanStatus) -> Result<()> {
        self.repo.mark_finished(scan_job_id, status).await
    }
}

/// In-memory tracker for tests and dry runs
#[derive(Default)]
pub struct MemoryScanTracker {
    jobs: parking_lot::Mutex<HashMap<Uuid, MemoryScanJob>>,
}

#[derive(Debug, Clone)]
struct MemoryScanJob {
    library_id: Uuid,
    status: ScanStatus,
    processed: u32,
    failed: u32,
}

impl MemoryScanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// External status override, e.g. a pause request mid-scan
    pub fn set_status(&self, scan_job_id: Uuid, status: ScanStatus) {
        if let Some(job) = self.jobs.lock().get_mut(&scan_job_id) {
            job.status = status;
        }
    }

    pub fn counters(&self, scan_job_id: Uuid) -> Option<(u32, u32)> {
        self.jobs.lock().get(&scan_job_id).map(|j| (j.processed, j.failed))
    }
}

#[async_trait]
impl ScanTracker for MemoryScanTracker {
    async fn begin(&self, library_id: Uuid) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.jobs.lock().insert(
            id,
            MemoryScanJob {
                library_id,
                status: ScanStatus::Pending,
                processed: 0,
                failed: 0,
            },
        );
        Ok(id)
    }

    async fn mark_started(&self, scan_job_id: Uuid, _total: i32) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(&scan_job_id) {
            if job.status == ScanStatus::Pending {
                job.status = ScanStatus::InProgress;
            }
        }
        Ok(())
    }

    async fn status(&self, scan_job_id: Uuid) -> Result<ScanStatus> {
        Ok(self
            .jobs
            .lock()
            .get(&scan_job_id)
            .map(|j| j.status)
            .unwrap_or(ScanStatus::Cancelled))
    }

    async fn item_processed(&self, library_id: Uuid) -> Result<()> {
        for job in self.jobs.lock().values_mut() {
            if job.library_id == library_id && job.status.is_active() {
                job.processed += 1;
            }
        }
        Ok(())
    }

    async fn item_failed(&self, library_id: Uuid) -> Result<()> {
        for job in self.jobs.lock().values_mut() {
            if job.library_id == library_id && job.status.is_active() {
                job.failed += 1;
            }
        }
        Ok(())
    }

    async fn set_metadata_status(&self, _scan_job_id: Uuid, _status: &str) -> Result<()> {
        Ok(())
    }

    async fn finish(&self, scan_job_id: Uuid, status: ScanStatus) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(&scan_job_id) {
            job.status = status;
        }
        Ok(())
    }
}

/// Result of one library scan
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub library_id: Uuid,
    pub scan_job_id: Uuid,
    /// Filesystem entries discovered, before deduplication
    pub discovered: usize,
    /// Unique items after deduplication
    pub items: usize,
    pub saved: usize,
    pub failed: usize,
    /// Handed to the durable queue for retry
    pub deferred: usize,
    pub cache_hits: usize,
    pub network_fetches: usize,
    pub status: ScanStatus,
}

/// One unique item the fetch phase resolves
struct Candidate {
    tmdb_id: Option<i64>,
    title: Option<String>,
    year: Option<i32>,
    path: Option<PathBuf>,
    size_bytes: i64,
    has_file_path: bool,
}

/// What one concurrent fetch task produced, applied to the summary and
/// tracker when the phase barrier collects it
enum CandidateOutcome {
    Resolved { item: IngestItem, cache_hit: bool },
    /// Already persisted with complete metadata, nothing to do
    AlreadyPersisted,
    /// Terminal per-item failure, logged inside the task
    Failed,
    /// Transient failure, hand to the durable queue
    Deferred {
        tmdb_id: i64,
        path: Option<PathBuf>,
        size_bytes: Option<i64>,
    },
}

pub struct ScanOrchestrator {
    scanner: PathScanner,
    registry: Arc<ProviderRegistry>,
    cache: Arc<MetadataCache>,
    store: Arc<dyn IngestStore>,
    queue: Arc<JobQueue>,
    tracker: Arc<dyn ScanTracker>,
    events: broadcast::Sender<ScanProgressEvent>,
    source: String,
}

impl ScanOrchestrator {
    pub fn new(
        scanner: PathScanner,
        registry: Arc<ProviderRegistry>,
        cache: Arc<MetadataCache>,
        store: Arc<dyn IngestStore>,
        queue: Arc<JobQueue>,
        tracker: Arc<dyn ScanTracker>,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            scanner,
            registry,
            cache,
            store,
            queue,
            tracker,
            events,
            source: TMDB_NAMESPACE.to_string(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgressEvent> {
        self.events.subscribe()
    }

    /// Run one full scan of a library. With `force` set, persisted items are
    /// re-fetched instead of skipped.
    pub async fn scan_library(&self, library: &LibraryRecord, force: bool) -> Result<ScanSummary> {
        let kind = library
            .media_kind()
            .with_context(|| format!("Library '{}' has unknown kind '{}'", library.name, library.kind))?;

        let provider = self
            .registry
            .get(&self.source)
            .with_context(|| format!("No '{}' provider registered", self.source))?;

        // A missing credential fails the scan before any work is admitted
        provider
            .ready()
            .with_context(|| format!("Provider '{}' is not ready", self.source))?;

        let scan_job_id = self.tracker.begin(library.id).await?;
        let reporter = ProgressReporter::new(self.events.clone(), library.id, scan_job_id);

        info!(
            library = %library.name,
            scan_job_id = %scan_job_id,
            root = %library.root_path,
            "Starting library scan"
        );

        // Phase 1: scan
        reporter.emit(ScanPhase::Scanning, 0, 0, "Scanning library paths");
        let entries = self.scanner.scan(std::path::Path::new(&library.root_path));
        let discovered = entries.len();
        let candidates = build_candidates(&entries);
        let items = candidates.len();
        reporter.emit(
            ScanPhase::Scanning,
            discovered,
            discovered.max(1),
            &format!("Discovered {} entries ({} unique items)", discovered, items),
        );

        self.tracker.mark_started(scan_job_id, items as i32).await?;

        if !force {
            let persisted = self.store.complete_ids(library.id, kind).await?;
            self.cache.seed_persisted(kind, persisted);
        }

        let mut summary = ScanSummary {
            library_id: library.id,
            scan_job_id,
            discovered,
            items,
            saved: 0,
            failed: 0,
            deferred: 0,
            cache_hits: 0,
            network_fetches: 0,
            status: ScanStatus::InProgress,
        };

        // Phase 2: fetch metadata. Every admitted candidate becomes its own
        // task; the dispatcher inside the provider bounds how many calls are
        // on the wire. The phase barrier collects every outcome before
        // episodes start.
        self.tracker.set_metadata_status(scan_job_id, "in_progress").await?;
        let mut resolved: Vec<IngestItem> = Vec::new();
        let mut halted: Option<ScanStatus> = None;

        let mut fetch_tasks: JoinSet<CandidateOutcome> = JoinSet::new();
        for candidate in candidates {
            let status = self.tracker.status(scan_job_id).await?;
            if !status.is_active() {
                warn!(status = status.as_str(), "Scan status changed externally, stopping admissions");
                halted = Some(status);
                break;
            }
            fetch_tasks.spawn(resolve_candidate(
                provider.clone(),
                self.cache.clone(),
                library.id,
                kind,
                candidate,
            ));
        }

        let mut collected = 0usize;
        while let Some(joined) = fetch_tasks.join_next().await {
            let outcome = joined.context("Metadata fetch task panicked")?;
            collected += 1;
            match outcome {
                CandidateOutcome::Resolved { item, cache_hit } => {
                    if cache_hit {
                        summary.cache_hits += 1;
                    } else {
                        summary.network_fetches += 1;
                    }
                    resolved.push(item);
                }
                CandidateOutcome::AlreadyPersisted => {
                    summary.cache_hits += 1;
                    self.tracker.item_processed(library.id).await?;
                }
                CandidateOutcome::Failed => {
                    summary.failed += 1;
                    self.tracker.item_failed(library.id).await?;
                }
                CandidateOutcome::Deferred { tmdb_id, path, size_bytes } => {
                    self.defer(library.id, kind, tmdb_id, path, size_bytes, &mut summary)
                        .await;
                }
            }
            reporter.report(ScanPhase::FetchingMetadata, collected, items, "Fetching metadata");
        }

        // Phase 3: fetch episode hierarchies for shows, concurrently. Items
        // keep their slot so a deferred show drops out while the rest keep
        // their fetched seasons.
        let show_total = resolved
            .iter()
            .filter(|item| item.metadata.kind == MediaKind::Show)
            .count();
        let mut slots: Vec<Option<IngestItem>> = Vec::with_capacity(resolved.len());
        let mut season_tasks: JoinSet<(usize, std::result::Result<Vec<SeasonMetadata>, ProviderError>)> =
            JoinSet::new();
        for item in resolved {
            if halted.is_some() {
                break;
            }
            if item.metadata.kind == MediaKind::Show {
                let status = self.tracker.status(scan_job_id).await?;
                if !status.is_active() {
                    halted = Some(status);
                    break;
                }
                let provider = provider.clone();
                let tmdb_id = item.metadata.tmdb_id;
                let season_count = item.metadata.season_count;
                let index = slots.len();
                slots.push(Some(item));
                season_tasks.spawn(async move {
                    (index, fetch_seasons(&*provider, tmdb_id, season_count).await)
                });
            } else {
                slots.push(Some(item));
            }
        }

        let mut shows_seen = 0usize;
        while let Some(joined) = season_tasks.join_next().await {
            let (index, result) = joined.context("Episode fetch task panicked")?;
            shows_seen += 1;
            match result {
                Ok(seasons) => {
                    if let Some(item) = slots[index].as_mut() {
                        item.seasons = seasons;
                    }
                }
                Err(e) if e.is_retryable() => {
                    if let Some(item) = slots[index].take() {
                        self.defer(
                            library.id,
                            MediaKind::Show,
                            item.metadata.tmdb_id,
                            item.path,
                            item.size_bytes,
                            &mut summary,
                        )
                        .await;
                    }
                }
                Err(e) => {
                    // The show itself is still worth saving
                    if let Some(item) = slots[index].as_ref() {
                        warn!(tmdb_id = item.metadata.tmdb_id, error = %e, "Episode fetch failed, saving show without hierarchy");
                    }
                }
            }
            reporter.report(
                ScanPhase::FetchingEpisodes,
                shows_seen,
                show_total,
                "Fetching episodes",
            );
        }
        let to_save: Vec<IngestItem> = slots.into_iter().flatten().collect();

        // Phase 4: save
        let save_total = to_save.len();
        for (index, item) in to_save.into_iter().enumerate() {
            if halted.is_none() {
                let status = self.tracker.status(scan_job_id).await?;
                if !status.is_active() {
                    halted = Some(status);
                }
            }
            if halted.is_some() {
                break;
            }

            let tmdb_id = item.metadata.tmdb_id;
            match self.store.save(&item).await {
                Ok(()) => {
                    summary.saved += 1;
                    self.tracker.item_processed(library.id).await?;
                }
                Err(e) => {
                    warn!(tmdb_id = tmdb_id, error = %e, "Failed to save item");
                    summary.failed += 1;
                    self.tracker.item_failed(library.id).await?;
                }
            }
            reporter.report(ScanPhase::Saving, index + 1, save_total, "Saving metadata");
        }

        // Terminal: stamp the run and publish the summary
        let metadata_status = match halted {
            Some(ScanStatus::Failed) => "failed",
            // Paused or cancelled runs leave the metadata stage unfinished
            Some(_) => "in_progress",
            None => "completed",
        };
        self.tracker.set_metadata_status(scan_job_id, metadata_status).await?;
        summary.status = halted.unwrap_or(ScanStatus::Completed);
        self.tracker.finish(scan_job_id, summary.status).await?;

        reporter.emit(
            ScanPhase::Complete,
            1,
            1,
            &format!(
                "Scan {}: {} saved, {} failed, {} deferred, {} cache hits, {} fetched",
                summary.status.as_str(),
                summary.saved,
                summary.failed,
                summary.deferred,
                summary.cache_hits,
                summary.network_fetches
            ),
        );

        info!(
            library = %library.name,
            status = summary.status.as_str(),
            saved = summary.saved,
            failed = summary.failed,
            deferred = summary.deferred,
            cache_hits = summary.cache_hits,
            fetched = summary.network_fetches,
            "Library scan finished"
        );

        Ok(summary)
    }

    /// Hand a transiently failed item to the durable queue
    async fn defer(
        &self,
        library_id: Uuid,
        kind: MediaKind,
        tmdb_id: i64,
        path: Option<PathBuf>,
        size_bytes: Option<i64>,
        summary: &mut ScanSummary,
    ) {
        let job = MetadataFetchJob {
            library_id,
            kind,
            tmdb_id,
            source: self.source.clone(),
            path,
            size_bytes,
        };
        match self.queue.enqueue(&job).await {
            Ok(()) => {
                info!(tmdb_id = tmdb_id, "Deferred item to retry queue");
                summary.deferred += 1;
            }
            Err(e) => {
                warn!(tmdb_id = tmdb_id, error = %e, "Failed to enqueue retry, counting as failed");
                summary.failed += 1;
                let _ = self.tracker.item_failed(library_id).await;
            }
        }
    }
}

/// Resolve one candidate: cache first, then the provider, with a title
/// search fallback when no external id was extracted. Runs as a spawned
/// task, so everything it touches is owned or shared; summary and tracker
/// effects are described by the returned outcome.
async fn resolve_candidate(
    provider: Arc<dyn MetadataProvider>,
    cache: Arc<MetadataCache>,
    library_id: Uuid,
    kind: MediaKind,
    candidate: Candidate,
) -> CandidateOutcome {
    let tmdb_id = match candidate.tmdb_id {
        Some(id) => id,
        None => {
            let Some(title) = candidate.title.as_deref() else {
                return CandidateOutcome::Failed;
            };
            match provider.search(kind, title, candidate.year).await {
                // First hit wins; ambiguity resolution is not attempted
                Ok(hits) if !hits.is_empty() => hits[0].tmdb_id,
                Ok(_) => {
                    warn!(title = %title, kind = %kind, "No search results, skipping item");
                    return CandidateOutcome::Failed;
                }
                Err(e) => {
                    warn!(title = %title, error = %e, "Search failed, skipping item");
                    return CandidateOutcome::Failed;
                }
            }
        }
    };

    let key = CacheKey { kind, tmdb_id };
    let (metadata, cache_hit) = match cache.get(&key) {
        Some(CacheEntry::Persisted) => return CandidateOutcome::AlreadyPersisted,
        Some(CacheEntry::Fetched(metadata)) => (metadata, true),
        None => match provider.get_by_id(kind, tmdb_id).await {
            Ok(mut metadata) => {
                enrich_with_images(&*provider, &mut metadata).await;
                let metadata = Arc::new(metadata);
                cache.put(key, metadata.clone());
                (metadata, false)
            }
            Err(e) if e.is_retryable() => {
                return CandidateOutcome::Deferred {
                    tmdb_id,
                    path: candidate.path,
                    size_bytes: Some(candidate.size_bytes),
                };
            }
            Err(e) => {
                warn!(tmdb_id = tmdb_id, kind = %kind, error = %e, "Fetch failed, skipping item");
                return CandidateOutcome::Failed;
            }
        },
    };

    // Show hierarchies are fetched in their own phase
    CandidateOutcome::Resolved {
        item: IngestItem {
            library_id,
            metadata,
            seasons: Vec::new(),
            path: candidate.path,
            size_bytes: Some(candidate.size_bytes),
        },
        cache_hit,
    }
}

/// Collapse raw entries into unique fetch candidates. Entries sharing an
/// external id (or, failing that, a normalized title and year) are one item;
/// file sizes accumulate across an item's entries.
fn build_candidates(entries: &[ScannedEntry]) -> Vec<Candidate> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, Candidate> = HashMap::new();

    for entry in entries {
        // Directories only matter when they carry an id their files lack
        if entry.is_dir && entry.ids.tmdb_id.is_none() {
            continue;
        }

        let key = match entry.ids.tmdb_id {
            Some(id) => format!("id:{id}"),
            None => match entry.ids.title.as_deref() {
                Some(title) => format!(
                    "title:{}:{}",
                    title.to_lowercase(),
                    entry.ids.year.map(|y| y.to_string()).unwrap_or_default()
                ),
                None => continue,
            },
        };

        let size = if entry.is_dir { 0 } else { entry.size_bytes as i64 };
        match by_key.get_mut(&key) {
            Some(existing) => {
                existing.size_bytes += size;
                // Prefer a file path over a directory path
                if !entry.is_dir && !existing.has_file_path {
                    existing.path = Some(entry.path.clone());
                    existing.has_file_path = true;
                }
                if existing.title.is_none() {
                    existing.title = entry.ids.title.clone();
                }
                if existing.year.is_none() {
                    existing.year = entry.ids.year;
                }
            }
            None => {
                order.push(key.clone());
                by_key.insert(
                    key,
                    Candidate {
                        tmdb_id: entry.ids.tmdb_id,
                        title: entry.ids.title.clone(),
                        year: entry.ids.year,
                        path: Some(entry.path.clone()),
                        size_bytes: size,
                        has_file_path: !entry.is_dir,
                    },
                );
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect()
}
