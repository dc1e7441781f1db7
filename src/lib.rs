//! Curator - bulk media metadata ingestion service
//!
//! Scans library directories for media files, resolves each item against an
//! external metadata catalog under a sliding-window rate limit, and persists
//! the results idempotently. Transient failures ride a durable,
//! crash-recoverable retry queue; progress is reported as broadcast events.

pub mod config;
pub mod db;
pub mod jobs;
pub mod services;

pub use config::Config;
pub use db::Database;
