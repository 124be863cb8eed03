//! Shared fixtures for the store tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use herdbook::error::LedgerError;
use herdbook::ledger::{LedgerBackend, MemoryLedgerBackend};
use herdbook::remote::{MemoryRemote, RemoteCollection};
use herdbook::types::Filters;
use herdbook::{Record, RemoteError, ResilientStore, StoreEvent, StoreOptions};

/// Columns of a fully migrated `cattle` table.
pub const CATTLE_COLUMNS: &[&str] = &["name", "weight", "user_id", "created_at", "updated_at"];

/// `cattle` before the ownership migration.
pub const LEGACY_CATTLE_COLUMNS: &[&str] = &["name", "weight", "created_at", "updated_at"];

pub struct Harness {
    pub remote: Arc<MemoryRemote>,
    pub backend: Arc<dyn LedgerBackend>,
    pub store: Arc<ResilientStore>,
    pub events: Arc<Mutex<Vec<StoreEvent>>>,
}

impl Harness {
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    pub fn ledger_len(&self, resource: &str) -> usize {
        self.store.ledger().load_all(resource).len()
    }
}

pub fn harness() -> Harness {
    harness_with(MemoryRemote::new(), |options| options)
}

pub fn harness_with(
    remote: MemoryRemote,
    configure: impl FnOnce(StoreOptions) -> StoreOptions,
) -> Harness {
    let backend: Arc<dyn LedgerBackend> = Arc::new(MemoryLedgerBackend::new());
    harness_on(remote, backend, configure)
}

pub fn harness_on(
    remote: MemoryRemote,
    backend: Arc<dyn LedgerBackend>,
    configure: impl FnOnce(StoreOptions) -> StoreOptions,
) -> Harness {
    let remote = Arc::new(remote);
    let options = StoreOptions::new(remote.clone(), backend.clone())
        .with_resources(["cattle", "horses"]);
    let store = Arc::new(ResilientStore::new(configure(options)));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    store.events().subscribe(move |event| sink.lock().push(event.clone()));

    Harness {
        remote,
        backend,
        store,
        events,
    }
}

pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Backend whose writes always fail, for exercising a broken local fallback.
#[derive(Default)]
pub struct ReadOnlyBackend;

impl LedgerBackend for ReadOnlyBackend {
    fn get_item(&self, _key: &str) -> Result<Option<String>, LedgerError> {
        Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), LedgerError> {
        Err(LedgerError::Backend("storage quota exceeded".to_string()))
    }

    fn remove_item(&self, _key: &str) -> Result<(), LedgerError> {
        Err(LedgerError::Backend("storage quota exceeded".to_string()))
    }
}

// ============================================================================
// Slow remote: every create sleeps before reaching the inner remote
// ============================================================================

pub struct SlowCreateRemote {
    pub inner: Arc<MemoryRemote>,
    pub delay: Duration,
}

#[async_trait]
impl RemoteCollection for SlowCreateRemote {
    async fn probe_column(&self, resource: &str, field: &str) -> bool {
        self.inner.probe_column(resource, field).await
    }

    async fn create(
        &self,
        resource: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        tokio::time::sleep(self.delay).await;
        self.inner.create(resource, fields).await
    }

    async fn fetch_all(
        &self,
        resource: &str,
        filters: &Filters,
    ) -> Result<Vec<Record>, RemoteError> {
        self.inner.fetch_all(resource, filters).await
    }

    async fn fetch_by_id(&self, resource: &str, id: &str) -> Result<Option<Record>, RemoteError> {
        self.inner.fetch_by_id(resource, id).await
    }

    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        patch: &Map<String, Value>,
        filters: &Filters,
    ) -> Result<Record, RemoteError> {
        self.inner.update_by_id(resource, id, patch, filters).await
    }

    async fn delete_by_id(
        &self,
        resource: &str,
        id: &str,
        filters: &Filters,
    ) -> Result<(), RemoteError> {
        self.inner.delete_by_id(resource, id, filters).await
    }
}

/// A `cattle` store whose creates take `delay`. Returns the inner remote
/// for inspection.
pub fn slow_store(delay: Duration) -> (Arc<MemoryRemote>, Arc<ResilientStore>) {
    let remote = Arc::new(MemoryRemote::new());
    let slow = Arc::new(SlowCreateRemote {
        inner: remote.clone(),
        delay,
    });
    let options = StoreOptions::new(slow, Arc::new(MemoryLedgerBackend::new()))
        .with_resources(["cattle"]);
    (remote, Arc::new(ResilientStore::new(options)))
}
