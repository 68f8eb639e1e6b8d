use crate::entity::Entity;
use crate::error::AppError;
use crate::value::Value;
use log::{debug, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Keyed byte store with per-entry TTL. Implementations never fail; an unavailable
/// service behaves as a permanent miss.
pub trait CacheService: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>);
    fn delete(&self, key: &str);
}

/// Always misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl CacheService for NoCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _key: &str, _bytes: Vec<u8>, _ttl: Option<Duration>) {}

    fn delete(&self, _key: &str) {}
}

struct Slot {
    expires: Option<Instant>,
    bytes: Vec<u8>,
}

/// In-process LRU with lazy expiry.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, Slot>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        MemoryCache { inner: Mutex::new(LruCache::new(capacity)) }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Slot>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl CacheService for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut cache = self.lock();
        let expired = match cache.get(key) {
            None => return None,
            Some(slot) => slot.expires.is_some_and(|at| at <= Instant::now()),
        };
        if expired {
            cache.pop(key);
            return None;
        }
        cache.get(key).map(|slot| slot.bytes.clone())
    }

    fn set(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) {
        let expires = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.lock().put(key.to_string(), Slot { expires, bytes });
    }

    fn delete(&self, key: &str) {
        self.lock().pop(key);
    }
}

/// Cache payload of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub class: String,
    pub values: BTreeMap<String, Value>,
}

impl CachedEntity {
    pub fn of(entity: &Entity) -> Self {
        CachedEntity { class: entity.class().name().to_string(), values: entity.values().clone() }
    }

    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Entity cached under `key`, if present and decodable for `class_name`.
pub fn lookup(cache: &dyn CacheService, key: &str, class_name: &str) -> Option<BTreeMap<String, Value>> {
    let bytes = cache.get(key)?;
    match CachedEntity::decode(&bytes) {
        Ok(cached) if cached.class == class_name => {
            debug!("cache hit {key}");
            Some(cached.values)
        }
        Ok(cached) => {
            warn!("cache entry {key} belongs to {}, ignoring", cached.class);
            None
        }
        Err(e) => {
            warn!("undecodable cache entry {key}: {e}");
            cache.delete(key);
            None
        }
    }
}
