//! In-process cache backend

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CacheError;
use crate::models::ProviderMetadata;

use super::traits::{CacheEntry, CacheMeta, CacheStats, MetadataCache};

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    invalidations: u64,
}

/// Cache held in process memory; lost on restart
#[derive(Clone, Default)]
pub struct MemoryCache {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataCache for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut state = self.state.write().await;

        let expired = match state.entries.get(key) {
            Some(entry) => entry.meta.is_expired(),
            None => {
                state.misses += 1;
                return Ok(None);
            }
        };

        if expired {
            debug!(key = key, "Cache entry expired");
            state.entries.remove(key);
            state.misses += 1;
            return Ok(None);
        }

        state.hits += 1;
        Ok(state.entries.get(key).cloned())
    }

    async fn set(
        &self,
        key: &str,
        aggregate: ProviderMetadata,
        meta: CacheMeta,
    ) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state
            .entries
            .insert(key.to_string(), CacheEntry { aggregate, meta });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().await.entries.remove(key);
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.meta.has_tag(tag));
        let removed = (before - state.entries.len()) as u64;
        state.invalidations += removed;

        debug!(tag = tag, removed = removed, "Invalidated cache tag");
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            entries: state.entries.len() as u64,
            hits: state.hits,
            misses: state.misses,
            invalidations: state.invalidations,
        }
    }

    async fn purge(&self) -> Result<(), CacheError> {
        self.state.write().await.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::map_to_common_format;
    use std::time::Duration;

    fn aggregate(name: &str) -> ProviderMetadata {
        map_to_common_format("github", name, name, None, 0, "https://github.com/a/b")
    }

    // Test 1: Set then get returns the aggregate and counts a hit
    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryCache::new();
        cache
            .set("repositories:1", aggregate("a/b"), CacheMeta::new(None))
            .await
            .unwrap();

        let entry = cache.get("repositories:1").await.unwrap().unwrap();
        assert!(entry.aggregate.contains_key("a/b"));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    // Test 2: Missing key counts a miss
    #[tokio::test]
    async fn test_get_missing() {
        let cache = MemoryCache::new();
        assert!(cache.get("nope").await.unwrap().is_none());
        assert_eq!(cache.stats().await.misses, 1);
    }

    // Test 3: Expired entries are dropped on read
    #[tokio::test]
    async fn test_expired_entry_dropped() {
        let cache = MemoryCache::new();
        let mut meta = CacheMeta::new(Some(Duration::from_secs(1)));
        meta.created_at -= chrono::Duration::seconds(5);
        cache.set("k", aggregate("a/b"), meta).await.unwrap();

        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    // Test 4: Tag invalidation removes only tagged entries
    #[tokio::test]
    async fn test_invalidate_tag() {
        let cache = MemoryCache::new();
        cache
            .set("repositories:1", aggregate("a/b"), CacheMeta::new(None).with_tag("owner:1"))
            .await
            .unwrap();
        cache
            .set("repositories:2", aggregate("c/d"), CacheMeta::new(None).with_tag("owner:2"))
            .await
            .unwrap();

        let removed = cache.invalidate_tag("owner:1").await.unwrap();

        assert_eq!(removed, 1);
        assert!(cache.get("repositories:1").await.unwrap().is_none());
        assert!(cache.get("repositories:2").await.unwrap().is_some());
        assert_eq!(cache.stats().await.invalidations, 1);
    }

    // Test 5: Delete and purge
    #[tokio::test]
    async fn test_delete_and_purge() {
        let cache = MemoryCache::new();
        cache.set("a", aggregate("a/a"), CacheMeta::new(None)).await.unwrap();
        cache.set("b", aggregate("b/b"), CacheMeta::new(None)).await.unwrap();

        cache.delete("a").await.unwrap();
        cache.delete("missing").await.unwrap();
        assert_eq!(cache.stats().await.entries, 1);

        cache.purge().await.unwrap();
        assert_eq!(cache.stats().await.entries, 0);
    }
}
