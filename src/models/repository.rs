//! Repository models
//!
//! `RepositoryMetadata` is what a provider reports for one machine name;
//! `RepositoryRecord` is the canonical stored form owned by one owner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::OwnerId;

/// Metadata reported by a provider for a single repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    /// Human-readable name
    pub label: String,

    /// Optional description
    pub description: Option<String>,

    /// Number of open issues
    pub num_open_issues: u64,

    /// Id of the provider that reported this metadata
    pub source: String,

    /// Canonical URL of the repository
    pub url: String,
}

/// Aggregated provider output keyed by machine name
pub type ProviderMetadata = BTreeMap<String, RepositoryMetadata>;

/// A repository record persisted for an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    /// Store-assigned id (None until inserted)
    pub id: Option<i64>,

    /// Owning owner
    pub owner_id: OwnerId,

    /// Provider-assigned stable identifier, e.g. `vendor/name`
    pub machine_name: String,

    pub label: String,
    pub description: Option<String>,
    pub num_open_issues: u64,

    /// Provider id
    pub source: String,

    pub url: String,

    /// Digest over the metadata fields
    pub content_hash: String,
}

impl RepositoryRecord {
    /// Build an unsaved record from provider metadata
    pub fn from_metadata(
        owner_id: OwnerId,
        machine_name: impl Into<String>,
        metadata: &RepositoryMetadata,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            owner_id,
            machine_name: machine_name.into(),
            label: metadata.label.clone(),
            description: metadata.description.clone(),
            num_open_issues: metadata.num_open_issues,
            source: metadata.source.clone(),
            url: metadata.url.clone(),
            content_hash: content_hash.into(),
        }
    }

    /// Overwrite all metadata fields and the hash, keeping identity
    pub fn apply_metadata(&mut self, metadata: &RepositoryMetadata, content_hash: impl Into<String>) {
        self.label = metadata.label.clone();
        self.description = metadata.description.clone();
        self.num_open_issues = metadata.num_open_issues;
        self.source = metadata.source.clone();
        self.url = metadata.url.clone();
        self.content_hash = content_hash.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batman() -> RepositoryMetadata {
        RepositoryMetadata {
            label: "The Batman repository".to_string(),
            description: Some("This is where Batman keeps all his crime-fighting code.".to_string()),
            num_open_issues: 6,
            source: "yml_remote".to_string(),
            url: "https://example.com/batman-repo.yml".to_string(),
        }
    }

    #[test]
    fn test_record_from_metadata() {
        let record = RepositoryRecord::from_metadata(1, "batman-repo", &batman(), "abc");

        assert_eq!(record.id, None);
        assert_eq!(record.owner_id, 1);
        assert_eq!(record.machine_name, "batman-repo");
        assert_eq!(record.label, "The Batman repository");
        assert_eq!(record.num_open_issues, 6);
        assert_eq!(record.source, "yml_remote");
        assert_eq!(record.content_hash, "abc");
    }

    #[test]
    fn test_apply_metadata_keeps_identity() {
        let mut record = RepositoryRecord::from_metadata(1, "batman-repo", &batman(), "abc");
        record.id = Some(10);

        let mut changed = batman();
        changed.label = "Robin".to_string();
        changed.description = None;
        record.apply_metadata(&changed, "def");

        assert_eq!(record.id, Some(10));
        assert_eq!(record.machine_name, "batman-repo");
        assert_eq!(record.label, "Robin");
        assert_eq!(record.description, None);
        assert_eq!(record.content_hash, "def");
    }
}
