//! Remote YAML provider
//!
//! Recognises URLs ending in `.yml` / `.yaml` and reads a repository
//! description from the file. The first top-level key is the machine name:
//!
//! ```yaml
//! batman-repo:
//!   label: 'The Batman repository'
//!   description: 'This is where Batman keeps all his crime-fighting code.'
//!   num_open_issues: 6
//! ```

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{FetchError, PluginError};
use crate::models::ProviderMetadata;
use crate::sync::{HttpClientWithRateLimit, RetryManager};

use super::traits::{map_to_common_format, RepositoryProvider};

const YML_URL_PATTERN: &str = r"^https?://[a-zA-Z0-9.\-]+(:[0-9]+)?/[a-zA-Z0-9_\-.%/]+\.ya?ml$";

/// Configuration for the remote YAML provider
#[derive(Debug, Clone, Default)]
pub struct YmlRemoteConfig {
    /// Reject files larger than this many bytes (0 disables the check)
    pub max_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct YmlRepository {
    label: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    num_open_issues: u64,
}

/// Remote `.yml` file provider
pub struct YmlRemoteProvider {
    config: YmlRemoteConfig,
    pattern: Regex,
    http_client: Arc<HttpClientWithRateLimit>,
    retry_manager: RetryManager,
}

impl YmlRemoteProvider {
    pub const ID: &'static str = "yml_remote";

    pub fn new(
        config: YmlRemoteConfig,
        http_client: Arc<HttpClientWithRateLimit>,
        retry: RetryConfig,
    ) -> Result<Self, PluginError> {
        let pattern = Regex::new(YML_URL_PATTERN)
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            config,
            pattern,
            http_client,
            retry_manager: RetryManager::new(retry),
        })
    }

    /// Parse a repository description document
    fn parse_document(&self, uri: &str, body: &[u8]) -> Result<ProviderMetadata, FetchError> {
        let document: serde_yaml::Value = serde_yaml::from_slice(body)
            .map_err(|e| FetchError::InvalidData(format!("Invalid YAML: {}", e)))?;

        let mapping = document.as_mapping().ok_or_else(|| {
            FetchError::InvalidData("Expected a mapping at the document root".to_string())
        })?;

        let (key, value) = match mapping.iter().next() {
            Some(entry) => entry,
            None => return Ok(ProviderMetadata::new()),
        };

        let machine_name = key
            .as_str()
            .ok_or_else(|| FetchError::InvalidData("Machine name must be a string".to_string()))?;

        let repo: YmlRepository = serde_yaml::from_value(value.clone())
            .map_err(|e| FetchError::InvalidData(format!("Invalid repository entry: {}", e)))?;

        Ok(map_to_common_format(
            Self::ID,
            machine_name,
            &repo.label,
            repo.description.as_deref(),
            repo.num_open_issues,
            uri,
        ))
    }
}

#[async_trait]
impl RepositoryProvider for YmlRemoteProvider {
    fn id(&self) -> &str {
        Self::ID
    }

    fn label(&self) -> &str {
        "Remote .yml file"
    }

    fn validate(&self, uri: &str) -> bool {
        self.pattern.is_match(uri)
    }

    fn validate_help_text(&self) -> &str {
        "https://anything.anything/anything/anything.yml (or \"http\")"
    }

    async fn get_repo(&self, uri: &str) -> Result<ProviderMetadata, FetchError> {
        let body = match self
            .retry_manager
            .execute(|| self.http_client.get(uri))
            .await
        {
            Ok(body) => body,
            Err(FetchError::NotFound) => {
                debug!(uri = uri, "Remote YAML file does not exist");
                return Ok(ProviderMetadata::new());
            }
            Err(e) => return Err(e),
        };

        if self.config.max_bytes > 0 && body.len() > self.config.max_bytes {
            return Err(FetchError::InvalidData(format!(
                "YAML file is {} bytes, limit is {}",
                body.len(),
                self.config.max_bytes
            )));
        }

        self.parse_document(uri, &body)
    }
}
