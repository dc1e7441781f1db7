//! Provider abstraction for external metadata catalogs
//!
//! A unified interface over the external catalog the pipeline fetches from.
//! Consumers depend on this trait and receive a concrete client through the
//! [`ProviderRegistry`] constructed at startup, so tests can substitute
//! doubles without ambient globals.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace of the primary external catalog
pub const TMDB_NAMESPACE: &str = "tmdb";

/// Media kind, selected once per item; persistence strategy is matched on
/// this variant rather than re-checked throughout the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "show",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "movie" => Some(MediaKind::Movie),
            "show" | "tv" => Some(MediaKind::Show),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error classification for provider calls.
///
/// The client never retries internally; callers branch on this taxonomy
/// (the orchestrator skips and logs, the job queue retries transients).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connection failure, timeout, or a response with no readable body
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response with a provider-supplied message
    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    /// Lookup target does not exist; terminal for the item, never retried
    #[error("not found")]
    NotFound,

    /// 2xx response whose body did not parse
    #[error("failed to decode provider response: {0}")]
    Decode(String),

    /// No credential configured; aborts before any work is attempted
    #[error("provider API key not configured")]
    MissingApiKey,
}

impl ProviderError {
    /// Transient errors worth retrying under the job queue
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Provider { status, .. } => {
                *status == 429 || *status == 408 || (500..600).contains(status)
            }
            ProviderError::NotFound | ProviderError::Decode(_) | ProviderError::MissingApiKey => {
                false
            }
        }
    }
}

/// One hit from a title search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub tmdb_id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub overview: Option<String>,
}

/// Canonical metadata for one media item, unified across provider endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub tmdb_id: i64,
    pub kind: MediaKind,
    pub title: String,
    pub overview: Option<String>,
    pub release_date: Option<chrono::NaiveDate>,
    pub rating: Option<f64>,
    pub genres: Vec<String>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub logo_url: Option<String>,
    /// Poster variant with no baked-in language text
    pub textless_poster_url: Option<String>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
    /// Serial media only
    pub season_count: Option<i32>,
}

/// Season detail, with its episode list as the provider returns it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonMetadata {
    pub season_number: i32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<chrono::NaiveDate>,
    pub poster_url: Option<String>,
    pub episodes: Vec<EpisodeMetadata>,
}

/// Per-episode detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub season_number: i32,
    pub episode_number: i32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<chrono::NaiveDate>,
    pub runtime: Option<i32>,
    pub still_url: Option<String>,
    pub rating: Option<f64>,
}

/// Image variants for one item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSet {
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub logo_url: Option<String>,
    pub textless_poster_url: Option<String>,
}

/// Typed calls against the external catalog, one per provider operation
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Pre-flight check, called before any batch of work is admitted
    fn ready(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Search by title, optionally narrowed by year
    async fn search(
        &self,
        kind: MediaKind,
        title: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchHit>, ProviderError>;

    /// Fetch canonical metadata by catalog id
    async fn get_by_id(&self, kind: MediaKind, id: i64) -> Result<ProviderMetadata, ProviderError>;

    /// Fetch one season of a serial item, episodes included
    async fn get_season(
        &self,
        show_id: i64,
        season_number: i32,
    ) -> Result<SeasonMetadata, ProviderError>;

    /// Fetch one episode of a serial item
    async fn get_episode(
        &self,
        show_id: i64,
        season_number: i32,
        episode_number: i32,
    ) -> Result<EpisodeMetadata, ProviderError>;

    /// Fetch the image variants for an item
    async fn get_images(&self, kind: MediaKind, id: i64) -> Result<ImageSet, ProviderError>;
}

/// Explicit provider registry, constructed at startup and passed by handle.
///
/// No ambient global lookup: whoever needs a provider receives the registry
/// (or a provider pulled from it) as a constructor argument.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn MetadataProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, namespace: &str, provider: Arc<dyn MetadataProvider>) {
        self.providers.insert(namespace.to_string(), provider);
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<dyn MetadataProvider>> {
        self.providers.get(namespace).cloned()
    }

    /// The primary catalog provider
    pub fn primary(&self) -> Option<Arc<dyn MetadataProvider>> {
        self.get(TMDB_NAMESPACE)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("namespaces", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
