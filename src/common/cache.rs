//! In-memory caches for session-scoped lookups.
//!
//! Uses moka's high-performance concurrent cache implementations.

use std::{future::Future, hash::Hash, sync::Arc};

use moka::{future::Cache as AsyncCache, sync::Cache};

/// Thread-safe in-memory cache with configurable capacity.
///
/// Used for memoizing relationship descriptors per object type
/// (`MemCache<ObjectType, Arc<Vec<RelationshipDescriptor>>>`).
#[derive(Clone)]
pub struct MemCache<K, V> {
    variables: Cache<K, V>,
}

impl<K, V> MemCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`].
    pub fn new(capacity: usize) -> Self {
        Self {
            variables: Cache::new(capacity as u64),
        }
    }

    /// Set a value.
    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.variables.insert(key, value);
    }

    /// Get a value through key `&K`.
    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.variables.get(key)
    }
}

/// Async cache whose loads are single-flight.
///
/// Concurrent `get_or_load` calls for the same key share one `load` future;
/// failed loads are not cached so a later call retries.
#[derive(Clone)]
pub struct FlightCache<K, V> {
    entries: AsyncCache<K, V>,
}

impl<K, V> FlightCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: AsyncCache::new(capacity),
        }
    }

    pub async fn get_or_load<F, E>(
        &self,
        key: K,
        load: F,
    ) -> std::result::Result<V, Arc<E>>
    where
        F: Future<Output = std::result::Result<V, E>>,
        E: Send + Sync + 'static,
    {
        self.entries.try_get_with(key, load).await
    }

    pub async fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key).await
    }
}
