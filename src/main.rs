//! Curator - bulk media metadata ingestion service

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use curator::config::Config;
use curator::db::{CreateLibrary, Database};
use curator::services::{
    ArtworkCache, DispatcherConfig, JobQueue, JobQueueConfig, MediaKind, MetadataCache,
    MetadataJobProcessor, PathScanner, PgIngestStore, PgScanTracker, ProviderRegistry,
    RateLimitedDispatcher, ScanOrchestrator, TmdbClient, TMDB_NAMESPACE,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curator=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Curator");

    let db = Database::connect(&config.database_url).await?;
    db.ensure_schema().await?;
    tracing::info!("Database connected");

    // One shared dispatcher keeps every provider call under the rate limit
    let dispatcher = Arc::new(RateLimitedDispatcher::new(DispatcherConfig {
        window: config.rate_limit_window,
        window_max: config.rate_limit_window_max,
        max_concurrent: config.rate_limit_concurrency,
    }));

    let tmdb = TmdbClient::new(
        config.tmdb_api_key.clone().unwrap_or_default(),
        dispatcher,
        config.provider_timeout,
    );
    let mut registry = ProviderRegistry::new();
    registry.register(TMDB_NAMESPACE, Arc::new(tmdb));
    let registry = Arc::new(registry);

    let cache = Arc::new(MetadataCache::new());
    let artwork = Arc::new(ArtworkCache::new(&config.artwork_path));
    let store = Arc::new(PgIngestStore::new(db.clone(), artwork));

    let queue = Arc::new(JobQueue::new(
        Arc::new(db.queue_store()),
        JobQueueConfig {
            max_retries: config.queue_max_retries,
            retry_base: config.queue_retry_base,
            workers: config.queue_workers,
            ..JobQueueConfig::default()
        },
    ));

    // Re-deliver anything a previous process crashed on before taking new work
    let recovered = queue.recover().await?;
    if recovered > 0 {
        tracing::info!(recovered = recovered, "Recovered unfinished jobs from previous run");
    }

    let processor = Arc::new(MetadataJobProcessor::new(
        registry.clone(),
        store.clone(),
        cache.clone(),
        Some(db.scan_jobs()),
    ));
    let _workers = queue.start_workers(processor);

    let orchestrator = Arc::new(ScanOrchestrator::new(
        PathScanner::new(config.scan_max_depth, &config.media_extensions),
        registry,
        cache,
        store,
        queue,
        Arc::new(PgScanTracker::new(db.scan_jobs())),
    ));

    // Register configured libraries and run their initial scans
    for definition in &config.libraries {
        let Some(kind) = MediaKind::parse(&definition.kind) else {
            tracing::error!(
                library = %definition.name,
                kind = %definition.kind,
                "Unknown library kind, skipping"
            );
            continue;
        };

        let library = db
            .libraries()
            .get_or_create(CreateLibrary {
                name: definition.name.clone(),
                root_path: definition.root_path.clone(),
                kind,
            })
            .await?;

        match orchestrator.scan_library(&library, false).await {
            Ok(summary) => {
                tracing::info!(
                    library = %library.name,
                    saved = summary.saved,
                    failed = summary.failed,
                    deferred = summary.deferred,
                    "Initial scan finished"
                );
            }
            Err(e) => {
                tracing::error!(library = %library.name, error = %e, "Initial scan failed");
            }
        }
    }

    let _scheduler = match &config.rescan_schedule {
        Some(schedule) => {
            Some(curator::jobs::start_scheduler(schedule, orchestrator, db.clone()).await?)
        }
        None => None,
    };

    tracing::info!("Curator running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
