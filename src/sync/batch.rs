//! Batch reconciliation across many owners
//!
//! `BatchCoordinator` fans the sync service out over a set of owners with a
//! bounded number of concurrent tasks. One owner's failure never stops the
//! others, and an owner is never reconciled by two tasks at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::database::RepositoryStore;
use crate::error::ReconcileError;
use crate::models::OwnerId;

use super::reconciler::{RepositorySyncService, SyncOutcome};

/// Which owners a batch run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerFilter {
    /// Every active owner in the store
    AllActive,
    Owner(OwnerId),
    Owners(Vec<OwnerId>),
}

/// Final state of one owner's task
#[derive(Debug, Clone)]
pub enum OwnerTaskStatus {
    Succeeded(SyncOutcome),
    Failed(String),
    /// Never started; the reason says why
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct OwnerTaskResult {
    pub owner_id: OwnerId,
    pub status: OwnerTaskStatus,
}

/// Per-owner results of a batch run
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<OwnerTaskResult>,
    /// Shutdown fired before every owner was scheduled
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, OwnerTaskStatus::Succeeded(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, OwnerTaskStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, OwnerTaskStatus::Skipped(_)))
    }

    pub fn status_of(&self, owner_id: OwnerId) -> Option<&OwnerTaskStatus> {
        self.results
            .iter()
            .find(|r| r.owner_id == owner_id)
            .map(|r| &r.status)
    }

    fn count(&self, pred: impl Fn(&OwnerTaskStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}

/// Running counters for the current batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchProgress {
    fn record(&mut self, status: &OwnerTaskStatus) {
        self.completed += 1;
        match status {
            OwnerTaskStatus::Succeeded(_) => self.succeeded += 1,
            OwnerTaskStatus::Failed(_) => self.failed += 1,
            OwnerTaskStatus::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Removes an owner from the in-flight set when its task ends, even on panic
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<OwnerId>>>,
    owner_id: OwnerId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.owner_id);
    }
}

/// Resolves on a shutdown signal; never resolves once every sender is gone
async fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) {
    loop {
        match shutdown.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => return,
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Schedules reconciliation tasks for many owners
pub struct BatchCoordinator<S: RepositoryStore + 'static> {
    service: Arc<RepositorySyncService<S>>,
    config: BatchConfig,
    in_flight: Arc<Mutex<HashSet<OwnerId>>>,
    progress: watch::Sender<BatchProgress>,
}

impl<S: RepositoryStore + 'static> BatchCoordinator<S> {
    pub fn new(service: Arc<RepositorySyncService<S>>, config: BatchConfig) -> Self {
        let (progress, _) = watch::channel(BatchProgress::default());
        Self {
            service,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            progress,
        }
    }

    pub fn service(&self) -> &Arc<RepositorySyncService<S>> {
        &self.service
    }

    /// Watch progress of the most recent batch
    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    /// Owners currently being reconciled by any run of this coordinator
    pub fn in_flight(&self) -> Vec<OwnerId> {
        let mut ids: Vec<_> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Reconcile every owner matched by `filter`
    pub async fn synchronize_all(&self, filter: OwnerFilter) -> Result<BatchReport, ReconcileError> {
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        self.synchronize_all_until(filter, rx).await
    }

    /// Reconcile every owner matched by `filter` until `shutdown` fires
    ///
    /// After shutdown no new owner is started; tasks already running finish
    /// and the rest are reported as skipped.
    pub async fn synchronize_all_until(
        &self,
        filter: OwnerFilter,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<BatchReport, ReconcileError> {
        if self.service.registry().is_empty() {
            return Err(ReconcileError::NoEnabledProviders);
        }

        let owner_ids = match filter {
            OwnerFilter::AllActive => self.service.store().list_active_owner_ids().await?,
            OwnerFilter::Owner(id) => vec![id],
            OwnerFilter::Owners(ids) => ids,
        };

        self.progress.send_replace(BatchProgress {
            total: owner_ids.len(),
            ..Default::default()
        });
        info!(
            owners = owner_ids.len(),
            max_concurrent = self.config.max_concurrent,
            "Starting batch synchronization"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut report = BatchReport::default();
        let mut handles: Vec<(OwnerId, JoinHandle<OwnerTaskStatus>)> = Vec::new();
        let mut seen = HashSet::new();

        for owner_id in owner_ids {
            if !seen.insert(owner_id) {
                self.skip(&mut report, owner_id, "Owner listed more than once in this batch");
                continue;
            }
            if report.cancelled {
                self.skip(&mut report, owner_id, "Batch cancelled");
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Batch cancelled, no further owners will be scheduled");
                    report.cancelled = true;
                    self.skip(&mut report, owner_id, "Batch cancelled");
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        self.finish(&mut report, owner_id, OwnerTaskStatus::Failed(e.to_string()));
                        continue;
                    }
                },
            };

            let guard = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                if !in_flight.insert(owner_id) {
                    None
                } else {
                    Some(InFlightGuard {
                        in_flight: self.in_flight.clone(),
                        owner_id,
                    })
                }
            };
            let Some(guard) = guard else {
                drop(permit);
                self.skip(&mut report, owner_id, "Owner is already being synchronized");
                continue;
            };

            let service = self.service.clone();
            let progress = self.progress.clone();
            let task_timeout = Duration::from_secs(self.config.task_timeout_secs);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;

                let status = run_owner(&service, owner_id, task_timeout).await;
                progress.send_modify(|p| p.record(&status));
                status
            });
            handles.push((owner_id, handle));
        }

        for (owner_id, handle) in handles {
            match handle.await {
                Ok(status) => report.results.push(OwnerTaskResult { owner_id, status }),
                Err(e) => {
                    warn!(owner_id = owner_id, error = %e, "Owner task aborted");
                    self.finish(
                        &mut report,
                        owner_id,
                        OwnerTaskStatus::Failed(format!("Task aborted: {}", e)),
                    );
                }
            }
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            cancelled = report.cancelled,
            "Batch synchronization finished"
        );

        Ok(report)
    }

    fn skip(&self, report: &mut BatchReport, owner_id: OwnerId, reason: &str) {
        debug!(owner_id = owner_id, reason = reason, "Owner skipped");
        self.finish(report, owner_id, OwnerTaskStatus::Skipped(reason.to_string()));
    }

    fn finish(&self, report: &mut BatchReport, owner_id: OwnerId, status: OwnerTaskStatus) {
        self.progress.send_modify(|p| p.record(&status));
        report.results.push(OwnerTaskResult { owner_id, status });
    }
}

async fn run_owner<S: RepositoryStore>(
    service: &RepositorySyncService<S>,
    owner_id: OwnerId,
    task_timeout: Duration,
) -> OwnerTaskStatus {
    match tokio::time::timeout(task_timeout, service.synchronize_owner(owner_id)).await {
        Ok(Ok(outcome)) if outcome.is_success() => {
            info!(
                owner_id = owner_id,
                changes = outcome.changes(),
                "Updated repositories belonging to owner {}",
                owner_id
            );
            OwnerTaskStatus::Succeeded(outcome)
        }
        Ok(Ok(outcome)) => {
            let reason = outcome
                .fetch_failures
                .iter()
                .map(|f| format!("{} could not fetch {}: {}", f.provider, f.url, f.error))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(owner_id = owner_id, reason = %reason, "Owner synchronized with fetch failures");
            OwnerTaskStatus::Failed(reason)
        }
        Ok(Err(e)) => {
            warn!(owner_id = owner_id, error = %e, "Owner synchronization failed");
            OwnerTaskStatus::Failed(e.to_string())
        }
        Err(_) => {
            warn!(
                owner_id = owner_id,
                timeout_secs = task_timeout.as_secs(),
                "Owner synchronization timed out"
            );
            OwnerTaskStatus::Failed(format!(
                "Timed out after {} seconds",
                task_timeout.as_secs()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::database::SqliteStore;
    use crate::error::FetchError;
    use crate::models::{Owner, ProviderMetadata};
    use crate::notify::EventDispatcher;
    use crate::providers::{map_to_common_format, ProviderRegistry, RepositoryProvider};
    use crate::sync::reconciler::SyncServiceConfig;
    use async_trait::async_trait;

    /// Provider over `https://test.local/{name}` URLs
    ///
    /// Fetches take `delay`; a name of `fail` errors and `panic` panics.
    struct TestProvider {
        delay: Duration,
    }

    #[async_trait]
    impl RepositoryProvider for TestProvider {
        fn id(&self) -> &str {
            "test"
        }
        fn label(&self) -> &str {
            "Test"
        }
        fn validate(&self, uri: &str) -> bool {
            uri.starts_with("https://test.local/")
        }
        fn validate_help_text(&self) -> &str {
            "https://test.local/name"
        }
        async fn get_repo(&self, uri: &str) -> Result<ProviderMetadata, FetchError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let name = uri.trim_start_matches("https://test.local/");
            match name {
                "fail" => Err(FetchError::ServerError(503)),
                "panic" => panic!("provider blew up"),
                _ => Ok(map_to_common_format("test", name, name, None, 0, uri)),
            }
        }
    }

    async fn coordinator(
        delay: Duration,
        config: BatchConfig,
        owners: &[(OwnerId, &str)],
    ) -> BatchCoordinator<SqliteStore> {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        for (id, name) in owners {
            store
                .upsert_owner(
                    &Owner::new(*id, format!("owner {}", id))
                        .with_urls([format!("https://test.local/{}", name)]),
                )
                .await
                .unwrap();
        }

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(TestProvider { delay })).unwrap();

        let service = RepositorySyncService::new(
            store,
            Arc::new(registry),
            Arc::new(MemoryCache::new()),
            Arc::new(EventDispatcher::new()),
            SyncServiceConfig::default(),
        );
        BatchCoordinator::new(Arc::new(service), config)
    }

    // Test 1: Failing and panicking owners do not stop the others
    #[tokio::test]
    async fn test_failure_isolation() {
        let batch = coordinator(
            Duration::ZERO,
            BatchConfig::default(),
            &[(1, "one"), (2, "fail"), (3, "panic"), (4, "four")],
        )
        .await;

        let report = batch.synchronize_all(OwnerFilter::AllActive).await.unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 2);
        assert!(matches!(report.status_of(2), Some(OwnerTaskStatus::Failed(r)) if r.contains("503")));
        assert!(matches!(report.status_of(3), Some(OwnerTaskStatus::Failed(r)) if r.contains("aborted")));
        assert!(batch.in_flight().is_empty());

        let progress = *batch.subscribe().borrow();
        assert_eq!(
            progress,
            BatchProgress {
                total: 4,
                completed: 4,
                succeeded: 2,
                failed: 2,
                skipped: 0
            }
        );
    }

    // Test 2: Duplicate ids within one run are skipped
    #[tokio::test]
    async fn test_duplicate_owner_in_run() {
        let batch = coordinator(Duration::ZERO, BatchConfig::default(), &[(1, "one")]).await;

        let report = batch
            .synchronize_all(OwnerFilter::Owners(vec![1, 1]))
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.skipped(), 1);
    }

    // Test 3: An owner already in flight is skipped by a concurrent run
    #[tokio::test(start_paused = true)]
    async fn test_in_flight_dedup() {
        let batch = coordinator(Duration::from_secs(10), BatchConfig::default(), &[(1, "one")]).await;

        let (first, second) = tokio::join!(
            batch.synchronize_all(OwnerFilter::Owner(1)),
            batch.synchronize_all(OwnerFilter::Owner(1)),
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.succeeded(), 1);
        assert!(matches!(
            second.status_of(1),
            Some(OwnerTaskStatus::Skipped(r)) if r.contains("already")
        ));
    }

    // Test 4: Cancellation stops scheduling but in-flight owners finish
    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let config = BatchConfig {
            max_concurrent: 1,
            ..BatchConfig::default()
        };
        let batch = Arc::new(
            coordinator(Duration::from_secs(10), config, &[(1, "one"), (2, "two"), (3, "three")])
                .await,
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runner = batch.clone();
        let handle = tokio::spawn(async move {
            runner
                .synchronize_all_until(OwnerFilter::Owners(vec![1, 2, 3]), shutdown_rx)
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(()).unwrap();

        let report = handle.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert!(matches!(report.status_of(1), Some(OwnerTaskStatus::Succeeded(_))));
        assert_eq!(report.skipped(), 2);
    }

    // Test 5: Per-task timeout is a failure for that owner only
    #[tokio::test(start_paused = true)]
    async fn test_task_timeout() {
        let config = BatchConfig {
            task_timeout_secs: 5,
            ..BatchConfig::default()
        };
        let batch = coordinator(Duration::from_secs(60), config, &[(1, "one")]).await;

        let report = batch.synchronize_all(OwnerFilter::AllActive).await.unwrap();

        assert!(matches!(
            report.status_of(1),
            Some(OwnerTaskStatus::Failed(r)) if r.contains("Timed out")
        ));
    }

    // Test 6: Unknown owner fails without affecting the rest
    #[tokio::test]
    async fn test_unknown_owner() {
        let batch = coordinator(Duration::ZERO, BatchConfig::default(), &[(1, "one")]).await;

        let report = batch
            .synchronize_all(OwnerFilter::Owners(vec![1, 99]))
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        assert!(matches!(
            report.status_of(99),
            Some(OwnerTaskStatus::Failed(r)) if r.contains("Owner not found")
        ));
    }
}
