//! # Cache Module
//!
//! Bounded in-memory caching for provider lookups.
//!
//! The queue core only caches placeholder metadata (title, artists,
//! duration) keyed by provider id, so a playlist that is queued again does
//! not hit Spotify or SoundCloud a second time while the entry is fresh.
//!
//! ## Configuration
//!
//! ```env
//! METADATA_CACHE_TTL_SECS=3600   # Time-to-live in seconds (1 hour)
//! ```

pub mod lru_cache;

use std::time::Duration;
use tracing::info;

use crate::audio::track::{PendingMetadata, PendingSource};
use lru_cache::LRUCache;

const METADATA_CACHE_CAPACITY: usize = 5000;

/// Metadata de placeholders indexada por `proveedor:id`
#[derive(Debug, Clone)]
pub struct MetadataCache {
    inner: LRUCache<String, PendingMetadata>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        info!("🗄️ Caché de metadata: {} entradas, TTL {:?}", METADATA_CACHE_CAPACITY, ttl);
        Self {
            inner: LRUCache::new(METADATA_CACHE_CAPACITY, Some(ttl)),
        }
    }

    pub fn get(&self, pending: &PendingSource) -> Option<PendingMetadata> {
        self.inner.get(&pending.cache_key())
    }

    pub fn insert(&self, pending: &PendingSource, metadata: PendingMetadata) {
        self.inner.insert(pending.cache_key(), metadata);
    }

    pub fn hit_rate(&self) -> f64 {
        self.inner.metrics().hit_rate()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}
