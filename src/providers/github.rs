//! GitHub provider
//!
//! Recognises `https://github.com/{owner}/{name}` URLs and reads repository
//! metadata from the GitHub REST API.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{FetchError, PluginError};
use crate::models::ProviderMetadata;
use crate::sync::{HttpClientWithRateLimit, RetryManager};

use super::traits::{map_to_common_format, RepositoryProvider};

const GITHUB_URL_PATTERN: &str = r"^https://github\.com/[a-zA-Z0-9_\-/]+/[a-zA-Z0-9_\-/]+$";
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Configuration for the GitHub provider
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// REST API base URL (default: https://api.github.com)
    pub api_base: String,

    /// Optional personal access token sent as a bearer token
    pub token: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
        }
    }
}

impl GithubConfig {
    /// Read `api_base` and `token` from provider options
    pub fn from_options(options: &HashMap<String, String>) -> Self {
        Self {
            api_base: options
                .get("api_base")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            token: options.get("token").filter(|t| !t.is_empty()).cloned(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubRepoResponse {
    full_name: String,
    name: String,
    description: Option<String>,
    #[serde(default)]
    open_issues_count: u64,
    html_url: String,
}

/// GitHub repository provider
pub struct GithubProvider {
    config: GithubConfig,
    pattern: Regex,
    http_client: Arc<HttpClientWithRateLimit>,
    retry_manager: RetryManager,
}

impl GithubProvider {
    pub const ID: &'static str = "github";

    /// Create a GitHub provider sharing the given HTTP client
    pub fn new(
        config: GithubConfig,
        http_client: Arc<HttpClientWithRateLimit>,
        retry: RetryConfig,
    ) -> Result<Self, PluginError> {
        let pattern = Regex::new(GITHUB_URL_PATTERN)
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            config,
            pattern,
            http_client,
            retry_manager: RetryManager::new(retry),
        })
    }

    /// Split a validated URL into (owner, name)
    fn parse_owner_and_name(uri: &str) -> Option<(&str, &str)> {
        let path = uri.strip_prefix("https://github.com/")?;
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let owner = segments.next()?;
        let name = segments.next()?;
        Some((owner, name.trim_end_matches(".git")))
    }

    fn request_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Accept", "application/vnd.github+json".to_string()),
            ("X-GitHub-Api-Version", "2022-11-28".to_string()),
        ];
        if let Some(token) = &self.config.token {
            headers.push(("Authorization", format!("Bearer {}", token)));
        }
        headers
    }
}

#[async_trait]
impl RepositoryProvider for GithubProvider {
    fn id(&self) -> &str {
        Self::ID
    }

    fn label(&self) -> &str {
        "GitHub"
    }

    fn validate(&self, uri: &str) -> bool {
        self.pattern.is_match(uri)
    }

    fn validate_help_text(&self) -> &str {
        "https://github.com/vendor/name"
    }

    async fn get_repo(&self, uri: &str) -> Result<ProviderMetadata, FetchError> {
        let (owner, name) = Self::parse_owner_and_name(uri)
            .ok_or_else(|| FetchError::InvalidData(format!("Not a GitHub repository URL: {}", uri)))?;

        let api_url = format!("{}/repos/{}/{}", self.config.api_base, owner, name);
        let headers = self.request_headers();

        let body = match self
            .retry_manager
            .execute(|| self.http_client.get_with_headers(&api_url, &headers))
            .await
        {
            Ok(body) => body,
            Err(FetchError::NotFound) => {
                debug!(uri = uri, "GitHub repository does not exist");
                return Ok(ProviderMetadata::new());
            }
            Err(e) => return Err(e),
        };

        let repo: GithubRepoResponse = serde_json::from_slice(&body)
            .map_err(|e| FetchError::InvalidData(format!("Invalid GitHub response: {}", e)))?;

        Ok(map_to_common_format(
            Self::ID,
            &repo.full_name,
            &repo.name,
            repo.description.as_deref(),
            repo.open_issues_count,
            &repo.html_url,
        ))
    }
}
