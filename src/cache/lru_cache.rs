use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::debug;

/// Cache entry con TTL
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_access: Instant,
    ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_access: now,
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.ttl
            .map(|ttl| self.created_at.elapsed() > ttl)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
}

/// Cache acotado con TTL; al llenarse expulsa la entrada usada hace más tiempo
#[derive(Debug)]
pub struct LRUCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    capacity: usize,
    default_ttl: Option<Duration>,
    counters: Arc<Counters>,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            default_ttl,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_with_ttl(key, value, self.default_ttl)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.evict_one();
        }
        self.data.insert(key, CacheEntry::new(value, ttl)).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let value = match self.data.get_mut(key) {
            Some(entry) if entry.is_expired() => {
                drop(entry);
                self.data.remove(key);
                self.counters.expired_removals.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(mut entry) => {
                entry.last_access = Instant::now();
                Some(entry.value.clone())
            }
            None => None,
        };

        let counter = if value.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            self.counters.expired_removals.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }
        removed
    }

    fn evict_one(&self) {
        // Primero lo expirado; si no hay, la entrada menos usada
        if self.cleanup_expired() > 0 {
            return;
        }
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.data.remove(&key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired_removals: self.counters.expired_removals.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Clone for LRUCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            capacity: self.capacity,
            default_ttl: self.default_ttl,
            counters: self.counters.clone(),
        }
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
