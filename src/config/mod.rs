//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (PostgreSQL)
    pub database_url: String,

    /// TMDB API key (required for any metadata fetching)
    pub tmdb_api_key: Option<String>,

    /// Directory for locally cached artwork
    pub artwork_path: String,

    /// Default maximum directory depth for library scans
    pub scan_max_depth: usize,

    /// Accepted media file extensions (lowercase, no dot)
    pub media_extensions: Vec<String>,

    /// Provider rate limit: max dispatches per trailing window
    pub rate_limit_window_max: usize,

    /// Provider rate limit: trailing window length
    pub rate_limit_window: Duration,

    /// Provider rate limit: max concurrently executing calls
    pub rate_limit_concurrency: usize,

    /// Metadata fetch queue: worker pool size
    pub queue_workers: usize,

    /// Metadata fetch queue: max retries before a job is dropped
    pub queue_max_retries: u32,

    /// Metadata fetch queue: base delay for exponential retry backoff
    pub queue_retry_base: Duration,

    /// HTTP request timeout for provider calls
    pub provider_timeout: Duration,

    /// Cron expression for scheduled library re-scans (None disables)
    pub rescan_schedule: Option<String>,

    /// Libraries to register and scan
    pub libraries: Vec<LibraryDefinition>,
}

/// One library root configured at startup
#[derive(Debug, Clone)]
pub struct LibraryDefinition {
    pub name: String,
    pub kind: String,
    pub root_path: String,
}

/// Parse `LIBRARIES`: semicolon-separated `name:kind:path` entries, e.g.
/// `Movies:movie:/data/movies;Shows:show:/data/shows`
fn parse_libraries(value: &str) -> Result<Vec<LibraryDefinition>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(kind), Some(path))
                    if !name.is_empty() && !kind.is_empty() && !path.is_empty() =>
                {
                    Ok(LibraryDefinition {
                        name: name.to_string(),
                        kind: kind.to_string(),
                        root_path: path.to_string(),
                    })
                }
                _ => anyhow::bail!("Invalid library entry '{}', expected name:kind:path", entry),
            }
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;

        let media_extensions = env::var("MEDIA_EXTENSIONS")
            .map(|v| {
                v.split(',')
                    .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| default_media_extensions());

        Ok(Self {
            database_url,

            tmdb_api_key: env::var("TMDB_API_KEY").ok().filter(|k| !k.is_empty()),

            artwork_path: env::var("ARTWORK_PATH").unwrap_or_else(|_| "./data/artwork".to_string()),

            scan_max_depth: parse_env("SCAN_MAX_DEPTH", 10)?,

            media_extensions,

            // TMDB allows ~40 requests per 10 seconds; stay just under
            rate_limit_window_max: parse_env("RATE_LIMIT_WINDOW_MAX", 38)?,

            rate_limit_window: Duration::from_secs(parse_env("RATE_LIMIT_WINDOW_SECS", 10)?),

            rate_limit_concurrency: parse_env("RATE_LIMIT_CONCURRENCY", 10)?,

            queue_workers: parse_env("QUEUE_WORKERS", 4)?,

            queue_max_retries: parse_env("QUEUE_MAX_RETRIES", 5)?,

            queue_retry_base: Duration::from_secs(parse_env("QUEUE_RETRY_BASE_SECS", 5)?),

            provider_timeout: Duration::from_secs(parse_env("PROVIDER_TIMEOUT_SECS", 10)?),

            rescan_schedule: env::var("RESCAN_SCHEDULE").ok().filter(|s| !s.is_empty()),

            libraries: match env::var("LIBRARIES") {
                Ok(v) => parse_libraries(&v)?,
                Err(_) => Vec::new(),
            },
        })
    }
}

/// Parse an environment variable, falling back to a default when unset
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("Invalid {}", key)),
        Err(_) => Ok(default),
    }
}

/// Video container extensions recognized by default
fn default_media_extensions() -> Vec<String> {
    [
        "mkv", "mp4", "avi", "m4v", "mov", "wmv", "flv", "webm", "mpeg", "mpg", "ts", "m2ts",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
