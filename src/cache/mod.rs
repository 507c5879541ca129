//! Aggregate metadata cache
//!
//! Memoizes each owner's aggregated provider metadata so repeated
//! reconciliation within a short window does not refetch from providers.
//! Entries carry tags; invalidating an owner's tag drops everything cached for
//! that owner.

pub mod filesystem;
pub mod memory;
pub mod traits;

pub use filesystem::FilesystemCache;
pub use memory::MemoryCache;
pub use traits::{CacheEntry, CacheMeta, CacheStats, MetadataCache};

#[cfg(test)]
pub use traits::MockMetadataCache;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Build the configured cache backend
pub async fn from_config(config: &CacheConfig) -> Result<Arc<dyn MetadataCache>, CacheError> {
    match config.backend.as_str() {
        "filesystem" => {
            let cache =
                FilesystemCache::new_with_init(PathBuf::from(&config.filesystem.base_path)).await?;
            Ok(Arc::new(cache))
        }
        _ => Ok(Arc::new(MemoryCache::new())),
    }
}
