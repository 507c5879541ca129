//! Repository providers
//!
//! A provider knows how to recognise one class of repository URL and how to
//! fetch metadata for it:
//! - `github`: GitHub repositories via the REST API
//! - `yml_remote`: a YAML description file served over HTTP(S)
//!
//! Providers are instantiated from configuration by [`ProviderRegistry`].

pub mod github;
pub mod registry;
pub mod traits;
pub mod yml_remote;

pub use github::{GithubConfig, GithubProvider};
pub use registry::{provider_factory, ProviderFactory, ProviderRegistry, BUILTIN_PROVIDERS};
pub use traits::{map_to_common_format, RepositoryProvider};
pub use yml_remote::{YmlRemoteConfig, YmlRemoteProvider};

#[cfg(test)]
pub use traits::MockRepositoryProvider;
