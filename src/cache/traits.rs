//! Cache trait and related types
//!
//! This module defines the `MetadataCache` trait that all cache backends must
//! implement, along with `CacheEntry`, `CacheMeta`, and `CacheStats`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;
use crate::models::ProviderMetadata;

/// A cached aggregate together with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub aggregate: ProviderMetadata,
    pub meta: CacheMeta,
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// Time-to-live; `None` keeps the entry until invalidated
    #[serde(with = "option_duration_serde")]
    pub ttl: Option<Duration>,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// Invalidation tags
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Serde helper for Option<Duration> as whole seconds
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

impl CacheMeta {
    /// Metadata for a new entry created now
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            created_at: Utc::now(),
            tags: Vec::new(),
        }
    }

    /// Add an invalidation tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Checks if the cache entry has expired; permanent entries never expire
    pub fn is_expired(&self) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => {
                let expires_at =
                    self.created_at + chrono::Duration::from_std(ttl).unwrap_or_default();
                Utc::now() > expires_at
            }
        }
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of live entries
    pub entries: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses (including expired entries)
    pub misses: u64,
    /// Number of entries dropped by tag invalidation
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculates the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Trait for aggregate caches
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// Returns the name of this cache backend
    fn name(&self) -> &str;

    /// Retrieves a live entry by key
    ///
    /// Expired entries are removed and reported as `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores an aggregate, overwriting any existing entry
    async fn set(
        &self,
        key: &str,
        aggregate: ProviderMetadata,
        meta: CacheMeta,
    ) -> Result<(), CacheError>;

    /// Deletes an entry; succeeds if the entry doesn't exist
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every entry carrying `tag` and returns how many were removed
    async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError>;

    /// Returns statistics about cache usage
    async fn stats(&self) -> CacheStats;

    /// Deletes all entries
    async fn purge(&self) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Permanent entries never expire
    #[test]
    fn test_permanent_never_expires() {
        let mut meta = CacheMeta::new(None);
        meta.created_at = Utc::now() - chrono::Duration::days(365);
        assert!(!meta.is_expired());
    }

    // Test 2: TTL expiry
    #[test]
    fn test_ttl_expiry() {
        let meta = CacheMeta::new(Some(Duration::from_secs(3600)));
        assert!(!meta.is_expired());

        let mut meta = CacheMeta::new(Some(Duration::from_secs(10)));
        meta.created_at = Utc::now() - chrono::Duration::seconds(11);
        assert!(meta.is_expired());
    }

    // Test 3: Tags
    #[test]
    fn test_tags() {
        let meta = CacheMeta::new(None).with_tag("owner:1").with_tag("all");
        assert!(meta.has_tag("owner:1"));
        assert!(meta.has_tag("all"));
        assert!(!meta.has_tag("owner:2"));
    }

    // Test 4: Serialization keeps the TTL in seconds
    #[test]
    fn test_meta_serialization() {
        let meta = CacheMeta::new(Some(Duration::from_secs(90))).with_tag("owner:1");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["ttl"], 90);

        let parsed: CacheMeta = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, meta);

        let permanent = serde_json::to_value(CacheMeta::new(None)).unwrap();
        assert!(permanent["ttl"].is_null());
    }

    // Test 5: Hit rate calculation
    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
