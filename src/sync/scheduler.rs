//! Recurring batch scheduler
//!
//! Runs a batch over all active owners on a fixed interval, with an initial
//! delay and random jitter so that restarts do not hit providers at the same
//! moment. Manual runs for one owner or a set of owners are accepted through a
//! `ManualSyncHandle` while the scheduler is running.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::config::SchedulerSettings;
use crate::database::RepositoryStore;
use crate::error::ReconcileError;

use super::batch::{BatchCoordinator, BatchReport, OwnerFilter};

/// Summary of a finished batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

impl From<&BatchReport> for RunSummary {
    fn from(report: &BatchReport) -> Self {
        Self {
            succeeded: report.succeeded(),
            failed: report.failed(),
            skipped: report.skipped(),
            cancelled: report.cancelled,
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    /// When the last run finished
    pub last_run: Option<SystemTime>,
    pub last_result: Option<Result<RunSummary, String>>,
    /// Estimated start of the next scheduled run
    pub next_run: Option<SystemTime>,
    pub in_progress: bool,
}

/// Scheduler-level errors returned to manual callers
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler not running")]
    NotRunning,

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

struct ManualSyncRequest {
    filter: OwnerFilter,
    response: oneshot::Sender<Result<BatchReport, ReconcileError>>,
}

fn jitter(max_secs: u64) -> Duration {
    if max_secs == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(rand::thread_rng().gen_range(0..max_secs))
}

/// Periodic "all active owners" runs plus on-demand runs
pub struct SyncScheduler<S: RepositoryStore + 'static> {
    settings: SchedulerSettings,
    coordinator: Arc<BatchCoordinator<S>>,
    status: Arc<RwLock<SchedulerStatus>>,
    shutdown_tx: broadcast::Sender<()>,
    manual_sync_rx: mpsc::Receiver<ManualSyncRequest>,
    manual_sync_tx: mpsc::Sender<ManualSyncRequest>,
}

impl<S: RepositoryStore + 'static> SyncScheduler<S> {
    /// Create a scheduler; `shutdown_tx` stops both the loop and any running batch
    pub fn new(
        settings: SchedulerSettings,
        coordinator: Arc<BatchCoordinator<S>>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let (manual_sync_tx, manual_sync_rx) = mpsc::channel(32);

        Self {
            settings,
            coordinator,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            shutdown_tx,
            manual_sync_rx,
            manual_sync_tx,
        }
    }

    /// Get a handle for triggering manual runs
    pub fn manual_sync_handle(&self) -> ManualSyncHandle {
        ManualSyncHandle {
            tx: self.manual_sync_tx.clone(),
        }
    }

    /// Shared view of the scheduler status
    pub fn status_handle(&self) -> Arc<RwLock<SchedulerStatus>> {
        self.status.clone()
    }

    pub async fn get_status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Run until shutdown
    ///
    /// Scheduled runs only happen when `settings.enabled` is set; manual
    /// requests are served either way.
    pub async fn run(mut self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(self.settings.interval_secs.max(1));
        let first = Duration::from_secs(self.settings.initial_delay_secs);

        info!(
            enabled = self.settings.enabled,
            interval_secs = interval.as_secs(),
            "Starting sync scheduler"
        );

        let mut timer = interval_at(Instant::now() + first, interval);
        if self.settings.enabled {
            self.status.write().await.next_run = Some(SystemTime::now() + first);
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    break;
                }
                _ = timer.tick(), if self.settings.enabled => {
                    let extra = jitter(self.settings.jitter_secs);
                    if !extra.is_zero() {
                        debug!(jitter_secs = extra.as_secs(), "Delaying scheduled run");
                        let stopped = tokio::select! {
                            _ = shutdown_rx.recv() => true,
                            _ = tokio::time::sleep(extra) => false,
                        };
                        if stopped {
                            info!("Shutdown signal received during jitter delay, stopping sync scheduler");
                            break;
                        }
                    }

                    info!("Performing scheduled synchronization");
                    let _ = self.perform(OwnerFilter::AllActive).await;
                    self.status.write().await.next_run = Some(SystemTime::now() + interval);
                }
                Some(request) = self.manual_sync_rx.recv() => {
                    info!(filter = ?request.filter, "Manual synchronization triggered");
                    let result = self.perform(request.filter).await;
                    let _ = request.response.send(result);
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn perform(&self, filter: OwnerFilter) -> Result<BatchReport, ReconcileError> {
        self.status.write().await.in_progress = true;

        let result = self
            .coordinator
            .synchronize_all_until(filter, self.shutdown_tx.subscribe())
            .await;

        let mut status = self.status.write().await;
        status.in_progress = false;
        status.last_run = Some(SystemTime::now());
        status.last_result = Some(match &result {
            Ok(report) => {
                let summary = RunSummary::from(report);
                info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Synchronization run completed"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(error = %e, "Synchronization run failed");
                Err(e.to_string())
            }
        });

        result
    }
}

/// Handle for triggering manual runs
#[derive(Clone)]
pub struct ManualSyncHandle {
    tx: mpsc::Sender<ManualSyncRequest>,
}

impl ManualSyncHandle {
    /// Run a batch now and wait for its report
    pub async fn trigger(&self, filter: OwnerFilter) -> Result<BatchReport, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(ManualSyncRequest {
                filter,
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::NotRunning)?;

        let result = response_rx.await.map_err(|_| SchedulerError::NotRunning)?;
        Ok(result?)
    }
}
