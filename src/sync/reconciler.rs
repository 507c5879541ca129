//! Per-owner reconciliation
//!
//! `RepositorySyncService` runs every enabled provider over an owner's URLs,
//! merges the results, diffs them against stored records and applies the
//! resulting creates, updates and deletes. It also validates URLs submitted
//! for an owner before they are accepted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{CacheMeta, MetadataCache};
use crate::config::SyncConfig;
use crate::database::RepositoryStore;
use crate::error::{DbError, FetchError, ReconcileError, ValidationError};
use crate::models::{ChangeAction, ChangeEvent, Owner, OwnerId, ProviderMetadata, RepositoryRecord};
use crate::notify::EventDispatcher;
use crate::providers::{ProviderRegistry, RepositoryProvider};

use super::diff::{merge_metadata, plan_changes, PlannedChange};

/// Runtime settings for the sync service
#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    /// Compute changes without writing or notifying
    pub dry_run: bool,
    /// Upper bound on a single provider fetch
    pub fetch_timeout: Duration,
    /// Lifetime of cached aggregates; `None` keeps them until invalidated
    pub cache_ttl: Option<Duration>,
    /// Fetch each URL during validation to confirm it exists
    pub validate_fetch: bool,
}

impl Default for SyncServiceConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            fetch_timeout: Duration::from_secs(30),
            cache_ttl: None,
            validate_fetch: true,
        }
    }
}

impl From<&SyncConfig> for SyncServiceConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            fetch_timeout: config.fetch_timeout(),
            cache_ttl: config.cache_ttl(),
            validate_fetch: config.validate_fetch,
        }
    }
}

/// A provider fetch that contributed nothing to the aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub provider: String,
    pub url: String,
    pub error: FetchError,
}

/// Result of reconciling one owner
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub owner_id: OwnerId,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// No writes were made; `events` describes what would have happened
    pub dry_run: bool,
    /// Aggregate came from the cache
    pub from_cache: bool,
    pub events: Vec<ChangeEvent>,
    pub fetch_failures: Vec<FetchFailure>,
}

impl SyncOutcome {
    fn new(owner_id: OwnerId, dry_run: bool) -> Self {
        Self {
            owner_id,
            dry_run,
            ..Default::default()
        }
    }

    fn push(&mut self, event: ChangeEvent) {
        match event.action {
            ChangeAction::Created => self.created += 1,
            ChangeAction::Updated => self.updated += 1,
            ChangeAction::Deleted => self.deleted += 1,
        }
        self.events.push(event);
    }

    /// Total number of mutations (planned, for a dry run)
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// True when every provider fetch succeeded
    pub fn is_success(&self) -> bool {
        self.fetch_failures.is_empty()
    }
}

/// Open-issue totals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueStats {
    /// Across every record in the store
    pub total_open_issues: u64,
    /// Across one owner's records, when requested
    pub owner_open_issues: Option<u64>,
}

struct Aggregate {
    metadata: ProviderMetadata,
    failures: Vec<FetchFailure>,
    from_cache: bool,
}

/// Reconciles provider metadata into the entity store
pub struct RepositorySyncService<S: RepositoryStore> {
    store: Arc<S>,
    registry: Arc<ProviderRegistry>,
    cache: Arc<dyn MetadataCache>,
    dispatcher: Arc<EventDispatcher>,
    config: SyncServiceConfig,
}

impl<S: RepositoryStore> RepositorySyncService<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<ProviderRegistry>,
        cache: Arc<dyn MetadataCache>,
        dispatcher: Arc<EventDispatcher>,
        config: SyncServiceConfig,
    ) -> Self {
        Self {
            store,
            registry,
            cache,
            dispatcher,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SyncServiceConfig {
        &self.config
    }

    /// Usage hint listing every accepted URL shape
    pub fn help_text(&self) -> String {
        self.registry.help_text()
    }

    /// Reconcile one owner using the configured dry-run setting
    pub async fn synchronize(&self, owner: &Owner) -> Result<SyncOutcome, ReconcileError> {
        self.synchronize_with(owner, self.config.dry_run).await
    }

    /// Load an owner from the store and reconcile it
    pub async fn synchronize_owner(&self, owner_id: OwnerId) -> Result<SyncOutcome, ReconcileError> {
        let owner = self
            .store
            .get_owner(owner_id)
            .await?
            .ok_or(ReconcileError::OwnerNotFound(owner_id))?;
        self.synchronize(&owner).await
    }

    /// Reconcile one owner
    ///
    /// A failed fetch contributes nothing to the aggregate and is recorded in
    /// the outcome. Records missing from the aggregate are deleted either way;
    /// an aggregate with failures is not cached.
    pub async fn synchronize_with(
        &self,
        owner: &Owner,
        dry_run: bool,
    ) -> Result<SyncOutcome, ReconcileError> {
        if self.registry.is_empty() {
            return Err(ReconcileError::NoEnabledProviders);
        }

        let aggregate = self.aggregate_for(owner).await;
        let existing = self.load_existing(owner.id, &aggregate.metadata).await?;
        let plan = plan_changes(owner.id, &aggregate.metadata, &existing);

        let mut outcome = SyncOutcome::new(owner.id, dry_run);
        outcome.unchanged = plan.unchanged;
        outcome.from_cache = aggregate.from_cache;
        outcome.fetch_failures = aggregate.failures;

        if dry_run {
            for change in plan.changes {
                let action = change.action();
                outcome.push(ChangeEvent::new(change.into_record(), action));
            }
            debug!(owner_id = owner.id, changes = outcome.changes(), "Dry run complete");
            return Ok(outcome);
        }

        for change in plan.changes {
            let event = self.apply(change).await?;
            self.dispatcher.dispatch(&event);
            outcome.push(event);
        }

        info!(
            owner_id = owner.id,
            created = outcome.created,
            updated = outcome.updated,
            deleted = outcome.deleted,
            unchanged = outcome.unchanged,
            from_cache = outcome.from_cache,
            "Owner reconciled"
        );

        Ok(outcome)
    }

    async fn apply(&self, change: PlannedChange) -> Result<ChangeEvent, DbError> {
        let action = change.action();
        let record = match change {
            PlannedChange::Create(mut record) => {
                record.id = Some(self.store.insert_record(&record).await?);
                record
            }
            PlannedChange::Update(record) => {
                self.store.update_record(&record).await?;
                record
            }
            PlannedChange::Delete(record) => {
                let id = record.id.ok_or(DbError::NotFound)?;
                self.store.delete_record(id).await?;
                record
            }
        };
        Ok(ChangeEvent::new(record, action))
    }

    /// Stored records relevant to an aggregate
    async fn load_existing(
        &self,
        owner_id: OwnerId,
        aggregate: &ProviderMetadata,
    ) -> Result<Vec<RepositoryRecord>, DbError> {
        let mut existing = Vec::new();

        for (machine_name, metadata) in aggregate {
            if let Some(record) = self
                .store
                .find_record(owner_id, machine_name, &metadata.source)
                .await?
            {
                existing.push(record);
            }
        }

        let names: Vec<String> = aggregate.keys().cloned().collect();
        existing.extend(self.store.find_records_excluding(owner_id, &names).await?);

        Ok(existing)
    }

    /// Cached aggregate for the owner, or a fresh one from the providers
    async fn aggregate_for(&self, owner: &Owner) -> Aggregate {
        let key = Owner::cache_key(owner.id);

        match self.cache.get(&key).await {
            Ok(Some(entry)) => {
                debug!(owner_id = owner.id, "Using cached aggregate");
                return Aggregate {
                    metadata: entry.aggregate,
                    failures: Vec::new(),
                    from_cache: true,
                };
            }
            Ok(None) => {}
            Err(e) => warn!(owner_id = owner.id, error = %e, "Cache lookup failed"),
        }

        let mut metadata = ProviderMetadata::new();
        let mut failures = Vec::new();

        for provider in self.registry.enabled_providers() {
            for url in owner.urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
                if !provider.validate(url) {
                    continue;
                }

                match self.fetch(provider.as_ref(), url).await {
                    Ok(found) => merge_metadata(&mut metadata, found),
                    Err(error) => {
                        warn!(
                            owner_id = owner.id,
                            provider = provider.id(),
                            url = url,
                            error = %error,
                            "Provider fetch failed"
                        );
                        failures.push(FetchFailure {
                            provider: provider.id().to_string(),
                            url: url.to_string(),
                            error,
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            let meta = CacheMeta::new(self.config.cache_ttl).with_tag(Owner::cache_tag(owner.id));
            if let Err(e) = self.cache.set(&key, metadata.clone(), meta).await {
                warn!(owner_id = owner.id, error = %e, "Failed to cache aggregate");
            }
        }

        Aggregate {
            metadata,
            failures,
            from_cache: false,
        }
    }

    /// Single provider fetch bounded by the configured timeout
    async fn fetch(
        &self,
        provider: &dyn RepositoryProvider,
        url: &str,
    ) -> Result<ProviderMetadata, FetchError> {
        match tokio::time::timeout(self.config.fetch_timeout, provider.get_repo(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::TimedOut(self.config.fetch_timeout.as_secs())),
        }
    }

    /// False when any entry's url is held by a different owner
    pub async fn is_unique(
        &self,
        metadata: &ProviderMetadata,
        owner_id: OwnerId,
    ) -> Result<bool, DbError> {
        for entry in metadata.values() {
            if self.store.url_claimed_by_other(&entry.url, owner_id).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Problems with a candidate URL list, one per offending URL
    pub async fn validate_urls_detailed(
        &self,
        urls: &[String],
        owner_id: OwnerId,
    ) -> Result<Vec<ValidationError>, ReconcileError> {
        let providers = self.registry.enabled_providers();
        if providers.is_empty() {
            return Ok(vec![ValidationError::NoEnabledProviders]);
        }

        let mut problems = Vec::new();

        for url in urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            let mut matched = false;

            // Every accepting provider that cannot confirm the url adds a problem
            for provider in providers {
                if !provider.validate(url) {
                    continue;
                }
                matched = true;

                if !self.config.validate_fetch {
                    break;
                }

                match self.fetch(provider.as_ref(), url).await {
                    Ok(found) if found.is_empty() => {
                        problems.push(ValidationError::NotFound(url.to_string()));
                    }
                    Ok(found) => {
                        if !self.is_unique(&found, owner_id).await? {
                            problems.push(ValidationError::Claimed(url.to_string()));
                        }
                        break;
                    }
                    Err(error) => {
                        debug!(provider = provider.id(), url = url, error = %error, "Validation fetch failed");
                        problems.push(ValidationError::Unreachable(url.to_string(), error));
                    }
                }
            }

            if !matched {
                problems.push(ValidationError::NotValid(url.to_string()));
            }
        }

        Ok(problems)
    }

    /// Space-joined problem summary; empty when every URL is acceptable
    pub async fn validate_urls(
        &self,
        urls: &[String],
        owner_id: OwnerId,
    ) -> Result<String, ReconcileError> {
        let problems = self.validate_urls_detailed(urls, owner_id).await?;
        Ok(problems
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Validate and store a new URL list, then drop the owner's cached aggregate
    pub async fn update_owner_urls(
        &self,
        owner_id: OwnerId,
        urls: &[String],
    ) -> Result<(), ReconcileError> {
        let problems = self.validate_urls(urls, owner_id).await?;
        if !problems.is_empty() {
            return Err(ReconcileError::Validation(problems));
        }

        let cleaned: Vec<String> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();

        self.store
            .set_owner_urls(owner_id, &cleaned)
            .await
            .map_err(|e| match e {
                DbError::NotFound => ReconcileError::OwnerNotFound(owner_id),
                other => other.into(),
            })?;

        self.invalidate_owner(owner_id).await;
        Ok(())
    }

    /// Drop everything cached for an owner; returns the number of entries removed
    pub async fn invalidate_owner(&self, owner_id: OwnerId) -> u64 {
        match self.cache.invalidate_tag(&Owner::cache_tag(owner_id)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(owner_id = owner_id, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Open-issue totals, optionally narrowed to one owner
    pub async fn open_issue_stats(&self, owner_id: Option<OwnerId>) -> Result<IssueStats, DbError> {
        let total_open_issues = self.store.total_open_issues(None).await?;
        let owner_open_issues = match owner_id {
            Some(id) => Some(self.store.total_open_issues(Some(id)).await?),
            None => None,
        };
        Ok(IssueStats {
            total_open_issues,
            owner_open_issues,
        })
    }
}
