//! Core pipeline services

pub mod artwork;
pub mod cache;
pub mod dispatcher;
pub mod identifier;
pub mod job_queue;
pub mod metadata_jobs;
pub mod orchestrator;
pub mod persistence;
pub mod progress;
pub mod provider;
pub mod scanner;
pub mod tmdb;

pub use artwork::{ArtworkCache, ArtworkKind};
pub use cache::{CacheEntry, CacheKey, MetadataCache};
pub use dispatcher::{DispatcherConfig, RateLimitedDispatcher};
pub use identifier::ExtractedIds;
pub use job_queue::{
    JobOutcome, JobProcessor, JobQueue, JobQueueConfig, MemoryQueueStore, QueueList, QueueStore,
};
pub use metadata_jobs::{MetadataFetchJob, MetadataJobProcessor};
pub use orchestrator::{
    MemoryScanTracker, PgScanTracker, ScanOrchestrator, ScanSummary, ScanTracker,
};
pub use persistence::{IngestItem, IngestStore, MemoryIngestStore, PgIngestStore};
pub use progress::{ProgressReporter, ScanPhase, ScanProgressEvent};
pub use provider::{
    EpisodeMetadata, ImageSet, MediaKind, MetadataProvider, ProviderError, ProviderMetadata,
    ProviderRegistry, SearchHit, SeasonMetadata, TMDB_NAMESPACE,
};
pub use scanner::{PathScanner, ScannedEntry};
pub use tmdb::TmdbClient;
