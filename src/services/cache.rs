//! In-memory metadata cache
//!
//! Deduplicates provider lookups within a scan run and, via store seeding,
//! across runs: entries already persisted with complete metadata are marked
//! so re-scans skip the network entirely unless a forced re-scan is
//! requested. Entries are written only after a successful fetch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::provider::{MediaKind, ProviderMetadata};

/// Cache key: one external catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: MediaKind,
    pub tmdb_id: i64,
}

/// One cached lookup result.
///
/// `Persisted` marks ids seeded from the store: the item is already saved
/// with complete metadata, so the fetch phase can skip both the network call
/// and the save without holding the full metadata in memory.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    Fetched(Arc<ProviderMetadata>),
    Persisted,
}

/// Injected, shared lookup cache
#[derive(Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Record a successful fetch
    pub fn put(&self, key: CacheKey, metadata: Arc<ProviderMetadata>) {
        self.entries.write().insert(key, CacheEntry::Fetched(metadata));
    }

    /// Seed ids whose persisted metadata already passes the completeness
    /// check, so they are never re-fetched this run
    pub fn seed_persisted(&self, kind: MediaKind, ids: impl IntoIterator<Item = i64>) {
        let mut entries = self.entries.write();
        let mut seeded = 0usize;
        for tmdb_id in ids {
            entries
                .entry(CacheKey { kind, tmdb_id })
                .or_insert(CacheEntry::Persisted);
            seeded += 1;
        }
        debug!(kind = %kind, seeded = seeded, "Seeded cache from persisted metadata");
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(id: i64) -> Arc<ProviderMetadata> {
        Arc::new(ProviderMetadata {
            tmdb_id: id,
            kind: MediaKind::Movie,
            title: format!("Movie {}", id),
            overview: None,
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
        })
    }

    #[test]
    fn test_put_then_get() {
        let cache = MetadataCache::new();
        let key = CacheKey { kind: MediaKind::Movie, tmdb_id: 42 };
        assert!(cache.get(&key).is_none());

        cache.put(key, metadata(42));
        match cache.get(&key) {
            Some(CacheEntry::Fetched(m)) => assert_eq!(m.tmdb_id, 42),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_seed_does_not_overwrite_fetched() {
        let cache = MetadataCache::new();
        let key = CacheKey { kind: MediaKind::Movie, tmdb_id: 7 };
        cache.put(key, metadata(7));
        cache.seed_persisted(MediaKind::Movie, [7, 8]);

        assert!(matches!(cache.get(&key), Some(CacheEntry::Fetched(_))));
        let seeded = CacheKey { kind: MediaKind::Movie, tmdb_id: 8 };
        assert!(matches!(cache.get(&seeded), Some(CacheEntry::Persisted)));
        assert_eq!(cache.len(), 2);
    }
}
