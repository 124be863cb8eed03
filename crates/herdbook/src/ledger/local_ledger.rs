//! LocalLedger: per-resource record sets that could not be committed
//! remotely, plus the outbox of deferred mutations against remote records.
//!
//! Both live as JSON arrays in a [`LedgerBackend`]:
//!
//! - `{prefix}{resource}`: records carrying a local id
//! - `{prefix}{resource}_pending`: queued [`PendingOp`]s
//!
//! Reads never fail. A missing key, an unreadable backend or corrupt JSON
//! all read as "no data" and are logged. Each read-modify-write runs under
//! one in-process lock; separate processes sharing a backend race with last
//! write wins.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::types::{Record, RecordId};

use super::traits::LedgerBackend;

/// Default key prefix, e.g. `local_cattle`.
pub const DEFAULT_KEY_PREFIX: &str = "local_";

// ============================================================================
// PendingOp
// ============================================================================

/// A mutation against a remote record that could not be applied yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingOp {
    Update {
        id: String,
        patch: Map<String, Value>,
    },
    Delete {
        id: String,
    },
}

impl PendingOp {
    pub fn id(&self) -> &str {
        match self {
            Self::Update { id, .. } | Self::Delete { id } => id,
        }
    }
}

/// What [`LocalLedger::retire`] found in place of a promoted entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Retired {
    /// The entry was removed as submitted.
    Unchanged,
    /// The entry was edited after it was read and has been removed anyway;
    /// this is its final state.
    Edited(Record),
    /// The entry was removed by someone else in the meantime.
    Missing,
}

// ============================================================================
// LocalLedger
// ============================================================================

pub struct LocalLedger {
    backend: Arc<dyn LedgerBackend>,
    key_prefix: String,
    write_lock: Mutex<()>,
}

impl LocalLedger {
    pub fn new(backend: Arc<dyn LedgerBackend>) -> Self {
        Self::with_prefix(backend, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(backend: Arc<dyn LedgerBackend>, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn records_key(&self, resource: &str) -> String {
        format!("{}{}", self.key_prefix, resource)
    }

    pub fn pending_key(&self, resource: &str) -> String {
        format!("{}{}_pending", self.key_prefix, resource)
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Every locally-held record of `resource`. Never fails.
    pub fn load_all(&self, resource: &str) -> Vec<Record> {
        self.read_records(resource)
    }

    /// Look up one local record.
    pub fn get(&self, resource: &str, id: &RecordId) -> Option<Record> {
        self.read_records(resource)
            .into_iter()
            .find(|r| r.id.as_ref() == Some(id))
    }

    /// Insert `record`, replacing any entry with the same id.
    pub fn append(&self, resource: &str, record: Record) -> Result<(), LedgerError> {
        ensure_local(&record)?;
        let _guard = self.write_lock.lock();
        let mut records = self.read_records(resource);
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.write_records(resource, &records)
    }

    /// Drop the entry with `id`. Returns whether anything was removed.
    pub fn remove(&self, resource: &str, id: &RecordId) -> Result<bool, LedgerError> {
        let _guard = self.write_lock.lock();
        let mut records = self.read_records(resource);
        let before = records.len();
        records.retain(|r| r.id.as_ref() != Some(id));
        if records.len() == before {
            return Ok(false);
        }
        self.write_records(resource, &records)?;
        Ok(true)
    }

    /// Overwrite the whole record set of `resource`.
    pub fn replace_all(&self, resource: &str, records: &[Record]) -> Result<(), LedgerError> {
        for record in records {
            ensure_local(record)?;
        }
        let _guard = self.write_lock.lock();
        self.write_records(resource, records)
    }

    /// Merge `patch` into the entry with `id`, in place. `Ok(None)` when the
    /// entry does not exist.
    pub fn patch(
        &self,
        resource: &str,
        id: &RecordId,
        patch: &Map<String, Value>,
    ) -> Result<Option<Record>, LedgerError> {
        let _guard = self.write_lock.lock();
        let mut records = self.read_records(resource);
        let Some(existing) = records.iter_mut().find(|r| r.id.as_ref() == Some(id)) else {
            return Ok(None);
        };
        existing.apply_patch(patch);
        let updated = existing.clone();
        self.write_records(resource, &records)?;
        Ok(Some(updated))
    }

    /// Remove a promoted entry, reporting whether it changed since
    /// `submitted` was read from the ledger.
    pub fn retire(&self, resource: &str, submitted: &Record) -> Result<Retired, LedgerError> {
        let _guard = self.write_lock.lock();
        let mut records = self.read_records(resource);
        let Some(pos) = records.iter().position(|r| r.id == submitted.id) else {
            return Ok(Retired::Missing);
        };
        let current = records.remove(pos);
        self.write_records(resource, &records)?;
        if current == *submitted {
            Ok(Retired::Unchanged)
        } else {
            Ok(Retired::Edited(current))
        }
    }

    /// Replace `from` with `to` wherever `field` holds it, in the local
    /// entries and in queued update patches. Returns how many values changed.
    pub fn rewrite_reference(
        &self,
        resource: &str,
        field: &str,
        from: &str,
        to: &str,
    ) -> Result<usize, LedgerError> {
        let _guard = self.write_lock.lock();
        let matches = |value: Option<&Value>| value.and_then(Value::as_str) == Some(from);

        let mut records = self.read_records(resource);
        let mut rewritten = 0;
        for record in records.iter_mut().filter(|r| matches(r.get(field))) {
            record.set(field, to);
            rewritten += 1;
        }
        if rewritten > 0 {
            self.write_records(resource, &records)?;
        }

        let mut ops: Vec<PendingOp> = self.read_array(&self.pending_key(resource));
        let mut patched = 0;
        for op in ops.iter_mut() {
            if let PendingOp::Update { patch, .. } = op {
                if matches(patch.get(field)) {
                    patch.insert(field.to_string(), Value::String(to.to_string()));
                    patched += 1;
                }
            }
        }
        if patched > 0 {
            self.write_array(&self.pending_key(resource), &ops)?;
        }
        Ok(rewritten + patched)
    }

    // -----------------------------------------------------------------------
    // Pending ops
    // -----------------------------------------------------------------------

    /// Queued mutations of `resource`, oldest first. Never fails.
    pub fn load_pending(&self, resource: &str) -> Vec<PendingOp> {
        self.read_array(&self.pending_key(resource))
    }

    /// Queue `op`.
    ///
    /// An update for an id that already has a queued update is merged into
    /// it. A delete supersedes every queued update for the same id.
    pub fn enqueue(&self, resource: &str, op: PendingOp) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock();
        let mut ops: Vec<PendingOp> = self.read_array(&self.pending_key(resource));
        match op {
            PendingOp::Update { id, patch } => {
                let queued = ops.iter_mut().find_map(|existing| match existing {
                    PendingOp::Update {
                        id: existing_id,
                        patch: existing_patch,
                    } if *existing_id == id => Some(existing_patch),
                    _ => None,
                });
                match queued {
                    Some(existing_patch) => {
                        for (key, value) in patch {
                            existing_patch.insert(key, value);
                        }
                    }
                    None => ops.push(PendingOp::Update { id, patch }),
                }
            }
            PendingOp::Delete { id } => {
                ops.retain(|existing| existing.id() != id);
                ops.push(PendingOp::Delete { id });
            }
        }
        self.write_array(&self.pending_key(resource), &ops)
    }

    /// Remove ops that have been settled by a replay. Ops that changed since
    /// they were read (e.g. a merged patch) stay queued.
    pub fn settle_pending(&self, resource: &str, settled: &[PendingOp]) -> Result<(), LedgerError> {
        if settled.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        let mut ops: Vec<PendingOp> = self.read_array(&self.pending_key(resource));
        for done in settled {
            if let Some(pos) = ops.iter().position(|op| op == done) {
                ops.remove(pos);
            }
        }
        self.write_array(&self.pending_key(resource), &ops)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn read_records(&self, resource: &str) -> Vec<Record> {
        let records: Vec<Record> = self.read_array(&self.records_key(resource));
        records
            .into_iter()
            .filter(|record| {
                if record.is_local() {
                    true
                } else {
                    warn!(
                        resource,
                        id = ?record.id,
                        "dropping ledger entry without a local id"
                    );
                    false
                }
            })
            .collect()
    }

    fn write_records(&self, resource: &str, records: &[Record]) -> Result<(), LedgerError> {
        self.write_array(&self.records_key(resource), records)
    }

    /// Decode a JSON array element by element, skipping entries that do not
    /// decode.
    fn read_array<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.backend.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "ledger backend read failed, treating as empty");
                return Vec::new();
            }
        };
        let items = match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!(key, error = %e, "corrupt ledger data, treating as empty");
                return Vec::new();
            }
        };
        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<T>(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(key, error = %e, "skipping undecodable ledger entry");
                    None
                }
            })
            .collect()
    }

    fn write_array<T: Serialize>(&self, key: &str, items: &[T]) -> Result<(), LedgerError> {
        if items.is_empty() {
            debug!(key, "ledger key emptied");
            return self.backend.remove_item(key);
        }
        let raw = serde_json::to_string(items)?;
        self.backend.set_item(key, &raw)
    }
}

fn ensure_local(record: &Record) -> Result<(), LedgerError> {
    match &record.id {
        Some(RecordId::Local(_)) => Ok(()),
        Some(RecordId::Remote(id)) => Err(LedgerError::NotLocal(id.clone())),
        None => Err(LedgerError::NotLocal(String::new())),
    }
}
