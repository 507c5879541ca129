//! Entity store for owners and repository records
//!
//! This module defines the `RepositoryStore` trait and its SQLite
//! implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{Owner, OwnerId, RepositoryRecord};

/// Persistence operations needed by reconciliation
///
/// Each write is atomic on its own. Implementations must reject a record whose
/// `url` is already held by a different owner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    // =========================================================================
    // Owner operations
    // =========================================================================

    /// Insert or replace an owner, including its URL list
    async fn upsert_owner(&self, owner: &Owner) -> Result<(), DbError>;

    /// Get an owner with its URLs
    async fn get_owner(&self, id: OwnerId) -> Result<Option<Owner>, DbError>;

    /// Ids of all active owners, ascending
    async fn list_active_owner_ids(&self) -> Result<Vec<OwnerId>, DbError>;

    /// Replace an owner's URL list, preserving order
    ///
    /// Returns `DbError::NotFound` if the owner doesn't exist.
    async fn set_owner_urls(&self, id: OwnerId, urls: &[String]) -> Result<(), DbError>;

    // =========================================================================
    // Repository record operations
    // =========================================================================

    /// All records belonging to an owner
    async fn records_for_owner(&self, owner_id: OwnerId) -> Result<Vec<RepositoryRecord>, DbError>;

    /// Find the record for an (owner, machine name, provider) triple
    async fn find_record(
        &self,
        owner_id: OwnerId,
        machine_name: &str,
        source: &str,
    ) -> Result<Option<RepositoryRecord>, DbError>;

    /// Records of an owner whose machine name is not in `machine_names`
    async fn find_records_excluding(
        &self,
        owner_id: OwnerId,
        machine_names: &[String],
    ) -> Result<Vec<RepositoryRecord>, DbError>;

    /// Whether a record with `url` exists for an owner other than `owner_id`
    async fn url_claimed_by_other(&self, url: &str, owner_id: OwnerId) -> Result<bool, DbError>;

    /// Insert a new record and return its id
    async fn insert_record(&self, record: &RepositoryRecord) -> Result<i64, DbError>;

    /// Overwrite an existing record by id
    async fn update_record(&self, record: &RepositoryRecord) -> Result<(), DbError>;

    /// Delete a record by id
    async fn delete_record(&self, id: i64) -> Result<(), DbError>;

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Sum of open issues over all records, or over one owner's records
    async fn total_open_issues(&self, owner_id: Option<OwnerId>) -> Result<u64, DbError>;
}
