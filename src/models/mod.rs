//! Domain models for repo-sync
//!
//! Owners, stored repository records, the ephemeral provider metadata that
//! feeds reconciliation, and the change events emitted for every mutation.

pub mod event;
pub mod owner;
pub mod repository;

// Re-export commonly used types
pub use event::{ChangeAction, ChangeEvent};
pub use owner::{Owner, OwnerId};
pub use repository::{ProviderMetadata, RepositoryMetadata, RepositoryRecord};
