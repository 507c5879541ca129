//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use repo_sync::cache::MemoryCache;
use repo_sync::database::SqliteStore;
use repo_sync::error::FetchError;
use repo_sync::models::{ChangeAction, ChangeEvent, ProviderMetadata};
use repo_sync::notify::{ChangeObserver, EventDispatcher};
use repo_sync::providers::{map_to_common_format, ProviderRegistry, RepositoryProvider};
use repo_sync::sync::{RepositorySyncService, SyncServiceConfig};

/// Canned remote state for a provider
#[derive(Clone)]
pub enum Remote {
    Found {
        machine_name: String,
        label: String,
        description: Option<String>,
        num_open_issues: u64,
    },
    Missing,
    Fails(FetchError),
    Hangs,
}

impl Remote {
    pub fn found(machine_name: &str, label: &str) -> Self {
        Remote::Found {
            machine_name: machine_name.to_string(),
            label: label.to_string(),
            description: None,
            num_open_issues: 0,
        }
    }
}

/// Provider answering from an in-memory table of URL -> remote state
///
/// Accepts every URL that starts with `prefix`. Unknown URLs are missing.
pub struct StaticProvider {
    id: String,
    prefix: String,
    remotes: Mutex<HashMap<String, Remote>>,
    calls: AtomicU32,
}

impl StaticProvider {
    pub fn new(id: &str, prefix: &str) -> Self {
        Self {
            id: id.to_string(),
            prefix: prefix.to_string(),
            remotes: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with(self, url: &str, remote: Remote) -> Self {
        self.set(url, remote);
        self
    }

    /// Change what the remote returns for `url`
    pub fn set(&self, url: &str, remote: Remote) {
        self.remotes.lock().unwrap().insert(url.to_string(), remote);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryProvider for StaticProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.id
    }

    fn validate(&self, uri: &str) -> bool {
        uri.starts_with(&self.prefix)
    }

    fn validate_help_text(&self) -> &str {
        &self.prefix
    }

    async fn get_repo(&self, uri: &str) -> Result<ProviderMetadata, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remote = self
            .remotes
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or(Remote::Missing);

        match remote {
            Remote::Found {
                machine_name,
                label,
                description,
                num_open_issues,
            } => Ok(map_to_common_format(
                &self.id,
                &machine_name,
                &label,
                description.as_deref(),
                num_open_issues,
                uri,
            )),
            Remote::Missing => Ok(ProviderMetadata::new()),
            Remote::Fails(error) => Err(error),
            Remote::Hangs => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ProviderMetadata::new())
            }
        }
    }
}

/// Observer that keeps every event it sees
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, action: ChangeAction) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.action == action)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl ChangeObserver for RecordingObserver {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_change(&self, event: &ChangeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Everything a test needs to drive the sync service
pub struct TestHarness {
    pub store: Arc<SqliteStore>,
    pub cache: Arc<MemoryCache>,
    pub observer: Arc<RecordingObserver>,
    pub service: Arc<RepositorySyncService<SqliteStore>>,
}

/// Build a service over an in-memory store with the given providers in order
pub async fn harness(
    providers: Vec<Arc<dyn RepositoryProvider>>,
    config: SyncServiceConfig,
) -> TestHarness {
    let store = Arc::new(
        SqliteStore::in_memory()
            .await
            .expect("Failed to create test database"),
    );

    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider).expect("Duplicate test provider");
    }

    let cache = Arc::new(MemoryCache::new());
    let observer = Arc::new(RecordingObserver::default());
    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe(observer.clone());

    let service = Arc::new(RepositorySyncService::new(
        store.clone(),
        Arc::new(registry),
        cache.clone(),
        Arc::new(dispatcher),
        config,
    ));

    TestHarness {
        store,
        cache,
        observer,
        service,
    }
}
