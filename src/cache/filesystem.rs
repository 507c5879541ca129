//! Filesystem-based cache backend
//!
//! Each entry is a single JSON file named after the URL-safe base64 encoding
//! of its key. Tags are kept in an in-memory index rebuilt from disk at start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::models::ProviderMetadata;

use super::traits::{CacheEntry, CacheMeta, CacheStats, MetadataCache};

/// On-disk entry format; includes the original key for recovery during scan
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    original_key: String,
    #[serde(flatten)]
    entry: CacheEntry,
}

#[derive(Default)]
struct CacheState {
    hits: u64,
    misses: u64,
    invalidations: u64,
    /// original key -> tags
    index: HashMap<String, Vec<String>>,
}

/// Filesystem-based cache backend
pub struct FilesystemCache {
    base_path: PathBuf,
    state: Arc<RwLock<CacheState>>,
}

impl FilesystemCache {
    /// Creates the base directory if needed and indexes existing entries
    pub async fn new_with_init(base_path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let cache = Self {
            base_path,
            state: Arc::new(RwLock::new(CacheState::default())),
        };
        cache.scan_existing_entries().await?;
        Ok(cache)
    }

    /// Returns the base path for cache storage
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Encodes a key to a safe filename using URL-safe base64
    fn encode_key(key: &str) -> String {
        URL_SAFE_NO_PAD.encode(key.as_bytes())
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", Self::encode_key(key)))
    }

    /// Rebuild the tag index from entry files on disk
    ///
    /// Unreadable files are skipped with a warning.
    async fn scan_existing_entries(&self) -> Result<(), CacheError> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut state = self.state.write().await;

        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match Self::read_entry(&path).await {
                Ok(stored) => {
                    state
                        .index
                        .insert(stored.original_key, stored.entry.meta.tags);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable cache file");
                }
            }
        }

        debug!(entries = state.index.len(), "Indexed filesystem cache");
        Ok(())
    }

    async fn read_entry(path: &Path) -> Result<StoredEntry, CacheError> {
        let content = fs::read(path).await?;
        serde_json::from_slice(&content).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    async fn remove_file(path: &Path) -> Result<(), CacheError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MetadataCache for FilesystemCache {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.key_to_path(key);

        let stored = match Self::read_entry(&path).await {
            Ok(stored) => stored,
            Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.state.write().await.misses += 1;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if stored.entry.meta.is_expired() {
            debug!(key = key, "Cache entry expired");
            Self::remove_file(&path).await?;
            let mut state = self.state.write().await;
            state.index.remove(key);
            state.misses += 1;
            return Ok(None);
        }

        self.state.write().await.hits += 1;
        Ok(Some(stored.entry))
    }

    async fn set(
        &self,
        key: &str,
        aggregate: ProviderMetadata,
        meta: CacheMeta,
    ) -> Result<(), CacheError> {
        let tags = meta.tags.clone();
        let stored = StoredEntry {
            original_key: key.to_string(),
            entry: CacheEntry { aggregate, meta },
        };
        let content =
            serde_json::to_vec(&stored).map_err(|e| CacheError::Serialization(e.to_string()))?;

        // Write then rename so readers never see a partial file
        let path = self.key_to_path(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &path).await?;

        self.state.write().await.index.insert(key.to_string(), tags);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        Self::remove_file(&self.key_to_path(key)).await?;
        self.state.write().await.index.remove(key);
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let keys: Vec<String> = {
            let state = self.state.read().await;
            state
                .index
                .iter()
                .filter(|(_, tags)| tags.iter().any(|t| t == tag))
                .map(|(key, _)| key.clone())
                .collect()
        };

        for key in &keys {
            Self::remove_file(&self.key_to_path(key)).await?;
        }

        let mut state = self.state.write().await;
        for key in &keys {
            state.index.remove(key);
        }
        state.invalidations += keys.len() as u64;

        debug!(tag = tag, removed = keys.len(), "Invalidated cache tag");
        Ok(keys.len() as u64)
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            entries: state.index.len() as u64,
            hits: state.hits,
            misses: state.misses,
            invalidations: state.invalidations,
        }
    }

    async fn purge(&self) -> Result<(), CacheError> {
        let keys: Vec<String> = self.state.read().await.index.keys().cloned().collect();
        for key in &keys {
            Self::remove_file(&self.key_to_path(key)).await?;
        }
        self.state.write().await.index.clear();
        Ok(())
    }
}
