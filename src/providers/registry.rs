//! Provider registry
//!
//! Maps configured provider ids onto constructors and keeps the enabled
//! providers in configured order.

use std::sync::Arc;

use tracing::info;

use crate::config::{ProviderConfig, RetryConfig};
use crate::error::PluginError;
use crate::sync::HttpClientWithRateLimit;

use super::github::{GithubConfig, GithubProvider};
use super::traits::RepositoryProvider;
use super::yml_remote::{YmlRemoteConfig, YmlRemoteProvider};

/// Constructs a provider from its configuration and the shared HTTP stack
pub type ProviderFactory = fn(
    &ProviderConfig,
    Arc<HttpClientWithRateLimit>,
    &RetryConfig,
) -> Result<Arc<dyn RepositoryProvider>, PluginError>;

/// Built-in providers by id
pub const BUILTIN_PROVIDERS: &[(&str, ProviderFactory)] = &[
    (GithubProvider::ID, build_github),
    (YmlRemoteProvider::ID, build_yml_remote),
];

fn build_github(
    config: &ProviderConfig,
    http: Arc<HttpClientWithRateLimit>,
    retry: &RetryConfig,
) -> Result<Arc<dyn RepositoryProvider>, PluginError> {
    let provider = GithubProvider::new(
        GithubConfig::from_options(&config.options),
        http,
        retry.clone(),
    )?;
    Ok(Arc::new(provider))
}

fn build_yml_remote(
    config: &ProviderConfig,
    http: Arc<HttpClientWithRateLimit>,
    retry: &RetryConfig,
) -> Result<Arc<dyn RepositoryProvider>, PluginError> {
    let max_bytes = match config.options.get("max_bytes") {
        Some(value) => value.parse().map_err(|_| {
            PluginError::InvalidConfig(format!("yml_remote max_bytes is not a number: {}", value))
        })?,
        None => 0,
    };
    let provider = YmlRemoteProvider::new(YmlRemoteConfig { max_bytes }, http, retry.clone())?;
    Ok(Arc::new(provider))
}

/// Look up the constructor for a provider id
pub fn provider_factory(id: &str) -> Option<ProviderFactory> {
    BUILTIN_PROVIDERS
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, factory)| *factory)
}

/// Ordered set of enabled providers
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn RepositoryProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every enabled provider in configured order
    ///
    /// Disabled entries are skipped; an unknown id is an error.
    pub fn from_config(
        configs: &[ProviderConfig],
        http: Arc<HttpClientWithRateLimit>,
        retry: &RetryConfig,
    ) -> Result<Self, PluginError> {
        let mut registry = Self::new();

        for config in configs.iter().filter(|c| c.enabled) {
            let factory = provider_factory(&config.id)
                .ok_or_else(|| PluginError::NotFound(config.id.clone()))?;
            registry.register(factory(config, http.clone(), retry)?)?;
        }

        info!(
            providers = ?registry.ids(),
            "Repository providers enabled"
        );

        Ok(registry)
    }

    /// Append a provider; ids must be unique
    pub fn register(&mut self, provider: Arc<dyn RepositoryProvider>) -> Result<(), PluginError> {
        if self.providers.iter().any(|p| p.id() == provider.id()) {
            return Err(PluginError::Duplicate(provider.id().to_string()));
        }
        self.providers.push(provider);
        Ok(())
    }

    /// Enabled providers in evaluation order
    pub fn enabled_providers(&self) -> &[Arc<dyn RepositoryProvider>] {
        &self.providers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Provider ids in evaluation order
    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Look up an enabled provider by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn RepositoryProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    /// Space-joined help texts of all enabled providers
    pub fn help_text(&self) -> String {
        self.providers
            .iter()
            .map(|p| p.validate_help_text())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::providers::traits::MockRepositoryProvider;

    fn http() -> Arc<HttpClientWithRateLimit> {
        Arc::new(HttpClientWithRateLimit::new(&HttpConfig::default()).unwrap())
    }

    fn mock(id: &str, help: &str) -> Arc<dyn RepositoryProvider> {
        let mut provider = MockRepositoryProvider::new();
        provider.expect_id().return_const(id.to_string());
        provider
            .expect_validate_help_text()
            .return_const(help.to_string());
        Arc::new(provider)
    }

    // Test 1: Configured order is preserved and disabled providers skipped
    #[test]
    fn test_from_config_preserves_order() {
        let configs = vec![
            ProviderConfig::new("yml_remote"),
            ProviderConfig {
                enabled: false,
                ..ProviderConfig::new("github")
            },
        ];
        let registry = ProviderRegistry::from_config(&configs, http(), &RetryConfig::default()).unwrap();
        assert_eq!(registry.ids(), vec!["yml_remote"]);

        let configs = vec![ProviderConfig::new("github"), ProviderConfig::new("yml_remote")];
        let registry = ProviderRegistry::from_config(&configs, http(), &RetryConfig::default()).unwrap();
        assert_eq!(registry.ids(), vec!["github", "yml_remote"]);
        assert!(registry.get("github").is_some());
    }

    // Test 2: Unknown provider id is rejected
    #[test]
    fn test_from_config_unknown_provider() {
        let configs = vec![ProviderConfig::new("gitlab")];
        let result = ProviderRegistry::from_config(&configs, http(), &RetryConfig::default());
        assert_eq!(result.err(), Some(PluginError::NotFound("gitlab".to_string())));
    }

    // Test 3: Invalid provider option is rejected
    #[test]
    fn test_from_config_invalid_option() {
        let configs = vec![ProviderConfig::new("yml_remote").with_option("max_bytes", "lots")];
        let result = ProviderRegistry::from_config(&configs, http(), &RetryConfig::default());
        assert!(matches!(result, Err(PluginError::InvalidConfig(_))));
    }

    // Test 4: No enabled providers yields an empty registry
    #[test]
    fn test_empty_registry() {
        let registry = ProviderRegistry::from_config(&[], http(), &RetryConfig::default()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.help_text(), "");
    }

    // Test 5: Help text joins every provider's hint with spaces
    #[test]
    fn test_help_text() {
        let mut registry = ProviderRegistry::new();
        registry.register(mock("a", "https://a.test/x")).unwrap();
        registry.register(mock("b", "https://b.test/y.yml")).unwrap();

        assert_eq!(registry.help_text(), "https://a.test/x https://b.test/y.yml");
        assert_eq!(registry.len(), 2);
    }

    // Test 6: Duplicate ids are rejected
    #[test]
    fn test_register_duplicate() {
        let mut registry = ProviderRegistry::new();
        registry.register(mock("a", "x")).unwrap();
        let result = registry.register(mock("a", "y"));
        assert_eq!(result, Err(PluginError::Duplicate("a".to_string())));
    }

    // Test 7: Built-in catalogue lists both providers
    #[test]
    fn test_builtin_catalogue() {
        assert!(provider_factory("github").is_some());
        assert!(provider_factory("yml_remote").is_some());
        assert!(provider_factory("gitlab").is_none());
    }
}
