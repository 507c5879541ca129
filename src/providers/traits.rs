//! Provider plugin trait definition
//!
//! This module defines the `RepositoryProvider` trait that all repository
//! providers must implement.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{ProviderMetadata, RepositoryMetadata};

/// Validates and fetches metadata for one class of repository URL
///
/// `validate` is a cheap syntactic filter used to route a URL to the one
/// provider that understands it; `get_repo` may still discover at fetch time
/// that the repository does not exist, in which case it returns an empty map.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Provider identifier, recorded as the source of every record it produces
    fn id(&self) -> &str;

    /// Human-readable provider name
    fn label(&self) -> &str;

    /// Whether `uri` belongs to this provider. Pure and total, no I/O.
    fn validate(&self, uri: &str) -> bool;

    /// Example URL shown to users composing their URL list
    fn validate_help_text(&self) -> &str;

    /// Fetch metadata for a URL this provider has validated
    ///
    /// Returns an empty map when the repository does not exist and
    /// `FetchError` on transport, authentication or parse failures.
    async fn get_repo(&self, uri: &str) -> Result<ProviderMetadata, FetchError>;
}

/// Build a single-entry metadata map tagged with the provider id
pub fn map_to_common_format(
    source: &str,
    machine_name: &str,
    label: &str,
    description: Option<&str>,
    num_open_issues: u64,
    url: &str,
) -> ProviderMetadata {
    let mut metadata = ProviderMetadata::new();
    metadata.insert(
        machine_name.to_string(),
        RepositoryMetadata {
            label: label.to_string(),
            description: description.map(str::to_string),
            num_open_issues,
            source: source.to_string(),
            url: url.to_string(),
        },
    );
    metadata
}
