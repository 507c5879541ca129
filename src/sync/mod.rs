//! Synchronization pipeline
//!
//! # Components
//!
//! - [`diff`]: Pure first-match-wins merge, content hashing and change planning
//! - [`reconciler`]: Per-owner reconciliation and URL validation
//! - [`batch`]: Bounded fan-out of reconciliation across many owners
//! - [`scheduler`]: Recurring and manually triggered batch runs
//! - [`http_client`]: Rate-limited HTTP client shared by providers
//! - [`retry`]: Exponential backoff for transient fetch failures
//!
//! # Example
//!
//! ```ignore
//! use repo_sync::sync::{BatchCoordinator, OwnerFilter, RepositorySyncService};
//!
//! let service = Arc::new(RepositorySyncService::new(store, registry, cache, dispatcher, config));
//! let batch = BatchCoordinator::new(service, BatchConfig::default());
//!
//! let report = batch.synchronize_all(OwnerFilter::AllActive).await?;
//! println!("{} owners updated", report.succeeded());
//! ```

pub mod batch;
pub mod diff;
pub mod http_client;
pub mod reconciler;
pub mod retry;
pub mod scheduler;

// Re-export main types for convenience
pub use batch::{
    BatchCoordinator, BatchProgress, BatchReport, OwnerFilter, OwnerTaskResult, OwnerTaskStatus,
};
pub use diff::{content_hash, merge_metadata, plan_changes, PlannedChange, ReconcilePlan};
pub use http_client::HttpClientWithRateLimit;
pub use reconciler::{
    FetchFailure, IssueStats, RepositorySyncService, SyncOutcome, SyncServiceConfig,
};
pub use retry::{RetryHint, RetryManager};
pub use scheduler::{ManualSyncHandle, RunSummary, SchedulerError, SchedulerStatus, SyncScheduler};
