//! repo-sync - Reconcile externally hosted repository metadata into a local store
//!
//! Pluggable providers fetch repository metadata for the URLs attached to each
//! owner; the sync service diffs it against stored records by content hash,
//! applies creates, updates and deletes, and notifies observers of every
//! mutation. A batch coordinator runs this across many owners concurrently.

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod notify;
pub mod providers;
pub mod sync;
pub mod telemetry;
