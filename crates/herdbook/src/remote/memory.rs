//! MemoryRemote: an in-process `RemoteCollection`.
//!
//! Behaves like a hosted table store: server-assigned UUID ids and
//! timestamps, optional per-resource column sets to stand in for a
//! not-yet-migrated schema, and owner-aware zero-row classification. Tests
//! drive it offline, script one-shot failures, and inspect the call log.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::types::{Filters, Record, ID_FIELD};

use super::traits::{probe_outcome, RemoteCollection};

// ============================================================================
// Call log
// ============================================================================

/// Which adapter operation a call or scripted failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Probe,
    Create,
    FetchAll,
    FetchById,
    Update,
    Delete,
}

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub resource: String,
    pub id: Option<String>,
    /// Create fields, update patch, or `{field: null}` for probes.
    pub payload: Map<String, Value>,
    pub filters: Filters,
}

type CreateHook = dyn Fn(&str, &Map<String, Value>) -> Option<RemoteError> + Send + Sync;

// ============================================================================
// MemoryRemote
// ============================================================================

#[derive(Default)]
struct Table {
    /// `None` accepts any field.
    columns: Option<HashSet<String>>,
    rows: Vec<Map<String, Value>>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Table>,
    offline: bool,
    scripted: VecDeque<(RemoteOp, RemoteError)>,
    create_hook: Option<Box<CreateHook>>,
    calls: Vec<RemoteCall>,
}

/// In-memory backend. Undeclared resources are created schemaless on first
/// use.
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict `resource` to the given columns (`id` is always allowed).
    /// Requests touching any other field fail with `SchemaIncompatible`.
    pub fn with_columns(self, resource: &str, columns: &[&str]) -> Self {
        self.set_columns(resource, columns);
        self
    }

    pub fn set_columns(&self, resource: &str, columns: &[&str]) {
        let mut inner = self.inner.lock();
        let table = inner.tables.entry(resource.to_string()).or_default();
        table.columns = Some(columns.iter().map(|c| c.to_string()).collect());
    }

    /// Simulate a network outage: every call fails with `Unreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Fail the next call of `op` with `error`. Queued failures are consumed
    /// in order.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.inner.lock().scripted.push_back((op, error));
    }

    /// Decide per create whether it fails. Returning `Some` rejects the row.
    pub fn on_create(
        &self,
        hook: impl Fn(&str, &Map<String, Value>) -> Option<RemoteError> + Send + Sync + 'static,
    ) {
        self.inner.lock().create_hook = Some(Box::new(hook));
    }

    pub fn clear_create_hook(&self) {
        self.inner.lock().create_hook = None;
    }

    /// Insert a row directly, bypassing the call log. Returns its id.
    pub fn seed(&self, resource: &str, fields: Value) -> String {
        let mut row = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let id = match row.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        let mut inner = self.inner.lock();
        inner
            .tables
            .entry(resource.to_string())
            .or_default()
            .rows
            .push(row);
        id
    }

    /// Current rows of `resource`, in insertion order.
    pub fn rows(&self, resource: &str) -> Vec<Map<String, Value>> {
        self.inner
            .lock()
            .tables
            .get(resource)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().calls.clone()
    }

    pub fn calls_of(&self, op: RemoteOp) -> Vec<RemoteCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Log the call, then apply offline mode and scripted failures.
    fn begin(&self, inner: &mut Inner, call: RemoteCall) -> Result<(), RemoteError> {
        let op = call.op;
        inner.calls.push(call);
        if inner.offline {
            return Err(RemoteError::unreachable("memory remote is offline"));
        }
        if let Some(pos) = inner.scripted.iter().position(|(o, _)| *o == op) {
            if let Some((_, error)) = inner.scripted.remove(pos) {
                return Err(error);
            }
        }
        Ok(())
    }

    fn call(op: RemoteOp, resource: &str, id: Option<&str>) -> RemoteCall {
        RemoteCall {
            op,
            resource: resource.to_string(),
            id: id.map(str::to_string),
            payload: Map::new(),
            filters: Filters::new(),
        }
    }

    fn probe_sync(&self, resource: &str, field: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        let mut call = Self::call(RemoteOp::Probe, resource, None);
        call.payload.insert(field.to_string(), Value::Null);
        self.begin(&mut inner, call)?;
        let table = inner.tables.entry(resource.to_string()).or_default();
        check_columns(resource, table, [field])
    }

    fn create_sync(
        &self,
        resource: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        let mut inner = self.inner.lock();
        let mut call = Self::call(RemoteOp::Create, resource, None);
        call.payload = fields.clone();
        self.begin(&mut inner, call)?;
        if let Some(hook) = &inner.create_hook {
            if let Some(error) = hook(resource, fields) {
                return Err(error);
            }
        }

        let table = inner.tables.entry(resource.to_string()).or_default();
        check_columns(resource, table, fields.keys().map(String::as_str))?;

        let mut row = fields.clone();
        row.insert(
            ID_FIELD.to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
        let now = Value::String(chrono::Utc::now().to_rfc3339());
        for field in ["created_at", "updated_at"] {
            if allows(table, field) && !row.contains_key(field) {
                row.insert(field.to_string(), now.clone());
            }
        }
        table.rows.push(row.clone());
        Ok(Record::from_remote(row))
    }

    fn fetch_all_sync(
        &self,
        resource: &str,
        filters: &Filters,
    ) -> Result<Vec<Record>, RemoteError> {
        let mut inner = self.inner.lock();
        let mut call = Self::call(RemoteOp::FetchAll, resource, None);
        call.filters = filters.clone();
        self.begin(&mut inner, call)?;
        let table = inner.tables.entry(resource.to_string()).or_default();
        check_columns(resource, table, filters.keys().map(String::as_str))?;
        Ok(table
            .rows
            .iter()
            .filter(|row| matches_filters(row, filters))
            .cloned()
            .map(Record::from_remote)
            .collect())
    }

    fn fetch_by_id_sync(&self, resource: &str, id: &str) -> Result<Option<Record>, RemoteError> {
        let mut inner = self.inner.lock();
        self.begin(&mut inner, Self::call(RemoteOp::FetchById, resource, Some(id)))?;
        let table = inner.tables.entry(resource.to_string()).or_default();
        Ok(table
            .rows
            .iter()
            .find(|row| row_id(row) == Some(id))
            .cloned()
            .map(Record::from_remote))
    }

    fn update_sync(
        &self,
        resource: &str,
        id: &str,
        patch: &Map<String, Value>,
        filters: &Filters,
    ) -> Result<Record, RemoteError> {
        let mut inner = self.inner.lock();
        let mut call = Self::call(RemoteOp::Update, resource, Some(id));
        call.payload = patch.clone();
        call.filters = filters.clone();
        self.begin(&mut inner, call)?;

        let table = inner.tables.entry(resource.to_string()).or_default();
        check_columns(
            resource,
            table,
            patch.keys().chain(filters.keys()).map(String::as_str),
        )?;
        let index = locate(resource, table, id, filters)?;
        let row = &mut table.rows[index];
        for (key, value) in patch {
            if key != ID_FIELD {
                row.insert(key.clone(), value.clone());
            }
        }
        Ok(Record::from_remote(row.clone()))
    }

    fn delete_sync(&self, resource: &str, id: &str, filters: &Filters) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        let mut call = Self::call(RemoteOp::Delete, resource, Some(id));
        call.filters = filters.clone();
        self.begin(&mut inner, call)?;

        let table = inner.tables.entry(resource.to_string()).or_default();
        check_columns(resource, table, filters.keys().map(String::as_str))?;
        let index = locate(resource, table, id, filters)?;
        table.rows.remove(index);
        Ok(())
    }
}

fn allows(table: &Table, field: &str) -> bool {
    field == ID_FIELD
        || table
            .columns
            .as_ref()
            .map_or(true, |columns| columns.contains(field))
}

fn check_columns<'a>(
    resource: &str,
    table: &Table,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<(), RemoteError> {
    for field in fields {
        if !allows(table, field) {
            return Err(RemoteError::schema(format!(
                "column {resource}.{field} does not exist"
            )));
        }
    }
    Ok(())
}

fn row_id(row: &Map<String, Value>) -> Option<&str> {
    row.get(ID_FIELD).and_then(Value::as_str)
}

fn matches_filters(row: &Map<String, Value>, filters: &Filters) -> bool {
    filters
        .iter()
        .all(|(field, expected)| row.get(field) == Some(expected))
}

/// Index of the row with `id` passing `filters`, or the zero-row error.
fn locate(
    resource: &str,
    table: &Table,
    id: &str,
    filters: &Filters,
) -> Result<usize, RemoteError> {
    match table.rows.iter().position(|row| row_id(row) == Some(id)) {
        None => Err(RemoteError::not_found(format!("{resource}/{id} does not exist"))),
        Some(index) if matches_filters(&table.rows[index], filters) => Ok(index),
        Some(_) => Err(RemoteError::permission_denied(format!(
            "{resource}/{id} is not owned by the acting user"
        ))),
    }
}

#[async_trait]
impl RemoteCollection for MemoryRemote {
    async fn probe_column(&self, resource: &str, field: &str) -> bool {
        probe_outcome(self.probe_sync(resource, field))
    }

    async fn create(
        &self,
        resource: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        self.create_sync(resource, fields)
    }

    async fn fetch_all(
        &self,
        resource: &str,
        filters: &Filters,
    ) -> Result<Vec<Record>, RemoteError> {
        self.fetch_all_sync(resource, filters)
    }

    async fn fetch_by_id(&self, resource: &str, id: &str) -> Result<Option<Record>, RemoteError> {
        self.fetch_by_id_sync(resource, id)
    }

    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        patch: &Map<String, Value>,
        filters: &Filters,
    ) -> Result<Record, RemoteError> {
        self.update_sync(resource, id, patch, filters)
    }

    async fn delete_by_id(
        &self,
        resource: &str,
        id: &str,
        filters: &Filters,
    ) -> Result<(), RemoteError> {
        self.delete_sync(resource, id, filters)
    }
}
