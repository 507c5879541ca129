//! Owner model

use serde::{Deserialize, Serialize};

/// Opaque numeric owner identifier
pub type OwnerId = i64;

/// An identity holding zero or more source URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Owner id (0 is reserved for the anonymous user)
    pub id: OwnerId,

    /// Display label
    pub label: String,

    /// Source URLs attached to the owner's profile
    #[serde(default)]
    pub urls: Vec<String>,

    /// Only active owners take part in batch runs
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Owner {
    /// Create a new active owner with no URLs
    pub fn new(id: OwnerId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            urls: Vec::new(),
            active: true,
        }
    }

    /// Set the owner's source URLs
    pub fn with_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the owner inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Cache key under which this owner's aggregate metadata is stored
    pub fn cache_key(id: OwnerId) -> String {
        format!("repositories:{}", id)
    }

    /// Invalidation tag attached to everything cached for this owner
    pub fn cache_tag(id: OwnerId) -> String {
        format!("owner:{}", id)
    }
}
