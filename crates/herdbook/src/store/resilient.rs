//! ResilientStore: remote-first record store with a local ledger fallback.
//!
//! Reads merge remote rows with local ledger entries and degrade to the
//! ledger alone when the backend cannot be read. Creates fall back to the
//! ledger under a minted local id. Updates and deletes route on the id
//! variant: local ids never touch the backend, remote ids that cannot be
//! written are queued in the outbox. `reconcile` promotes ledger entries and
//! replays the outbox.
//!
//! Public methods only return `Err` for failures the caller must act on
//! (permission, missing target, a broken local fallback). Everything else is
//! absorbed into degraded results, local writes or reports.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use crate::error::{RemoteError, RemoteErrorKind, StoreError};
use crate::events::{StoreEvent, StoreEvents};
use crate::ledger::{LocalLedger, PendingOp, Retired, DEFAULT_KEY_PREFIX};
use crate::ownership::{OwnershipFilter, DEFAULT_OWNER_FIELD};
use crate::remote::RemoteCollection;
use crate::types::{
    Filters, ListResult, Persistence, Record, RecordId, Saved, SentinelPrefix, PLACEHOLDER_OWNER,
};

use super::options::{
    ReferenceField, StoreOptions, DEFAULT_CREATED_AT_FIELD, DEFAULT_UPDATED_AT_FIELD,
};
use super::report::{DiscardedOp, Promotion, ReconcileError, ReconcileReport};

// ============================================================================
// ResilientStore
// ============================================================================

pub struct ResilientStore {
    remote: Arc<dyn RemoteCollection>,
    ledger: LocalLedger,
    ownership: OwnershipFilter,
    resources: Vec<String>,
    references: Vec<ReferenceField>,
    created_at_field: String,
    updated_at_field: String,
    placeholder_owner: String,
    sentinel_prefix: SentinelPrefix,
    events: StoreEvents,
    /// Per-resource async locks serializing reconcile passes
    locks: Mutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl ResilientStore {
    pub fn new(options: StoreOptions) -> Self {
        let key_prefix = options
            .key_prefix
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
        Self {
            remote: options.remote,
            ledger: LocalLedger::with_prefix(options.ledger_backend, key_prefix),
            ownership: OwnershipFilter::new(
                options
                    .owner_field
                    .unwrap_or_else(|| DEFAULT_OWNER_FIELD.to_string()),
            ),
            resources: options.resources,
            references: options.references,
            created_at_field: options
                .created_at_field
                .unwrap_or_else(|| DEFAULT_CREATED_AT_FIELD.to_string()),
            updated_at_field: options
                .updated_at_field
                .unwrap_or_else(|| DEFAULT_UPDATED_AT_FIELD.to_string()),
            placeholder_owner: options
                .placeholder_owner
                .unwrap_or_else(|| PLACEHOLDER_OWNER.to_string()),
            sentinel_prefix: options.sentinel_prefix.unwrap_or_default(),
            events: StoreEvents::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &StoreEvents {
        &self.events
    }

    pub fn ledger(&self) -> &LocalLedger {
        &self.ledger
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn owner_field(&self) -> &str {
        self.ownership.owner_field()
    }

    /// Whether `resource` has ledger entries or queued ops left to reconcile.
    pub fn has_outstanding(&self, resource: &str) -> bool {
        !self.ledger.load_all(resource).is_empty() || !self.ledger.load_pending(resource).is_empty()
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    /// Remote rows visible to `acting_user` followed by every local entry.
    ///
    /// Queued updates are overlaid onto their rows and rows with a queued
    /// delete are hidden. When the backend cannot be read only the local
    /// entries are returned and `degraded` is set.
    pub async fn list(&self, resource: &str, acting_user: Option<&str>) -> ListResult {
        let local = self.ledger.load_all(resource);
        let filters = self.owner_filters(resource, acting_user).await;

        match self.remote.fetch_all(resource, &filters).await {
            Ok(rows) => {
                let pending = self.ledger.load_pending(resource);
                let mut records = overlay_pending(rows, &pending);
                records.extend(local);
                ListResult {
                    records,
                    degraded: false,
                }
            }
            Err(error) if error.kind == RemoteErrorKind::NotFound => {
                debug!(resource, %error, "remote resource absent, listing local entries");
                ListResult {
                    records: local,
                    degraded: false,
                }
            }
            Err(error) => {
                warn!(
                    resource,
                    %error,
                    local = local.len(),
                    "remote read failed, serving local entries"
                );
                self.events.emit(&StoreEvent::DegradedRead {
                    resource: resource.to_string(),
                    error,
                });
                ListResult {
                    records: local,
                    degraded: true,
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Create a record remotely, or in the ledger when the backend refuses.
    ///
    /// Only a failing ledger write is returned as an error.
    pub async fn add(
        &self,
        resource: &str,
        fields: Map<String, Value>,
        acting_user: Option<&str>,
    ) -> Result<Saved, StoreError> {
        let mut record = Record::draft(fields);
        let now = timestamp();
        record.set(self.owner_field(), self.owner_value(acting_user));
        record.set(self.created_at_field.as_str(), now.clone());
        record.set(self.updated_at_field.as_str(), now);

        let error = match self.create_remote(resource, &record.fields).await {
            Ok(created) => {
                debug!(resource, id = ?created.id, "created remotely");
                return Ok(Saved {
                    record: created,
                    persistence: Persistence::Remote,
                });
            }
            Err(error) => error,
        };

        let id = RecordId::mint_local(self.sentinel_prefix);
        record.id = Some(id.clone());
        self.ledger.append(resource, record.clone())?;
        warn!(resource, %id, %error, "remote create failed, saved locally");
        self.events.emit(&StoreEvent::SavedLocally {
            resource: resource.to_string(),
            id,
            error,
        });

        Ok(Saved {
            record,
            persistence: Persistence::Local,
        })
    }

    // -----------------------------------------------------------------------
    // Update / delete
    // -----------------------------------------------------------------------

    /// Write `record`'s fields to wherever its id says it lives.
    ///
    /// A remote write that fails for a reason other than permission or a
    /// missing row is queued, and the returned copy is marked
    /// [`Persistence::Pending`].
    pub async fn update(
        &self,
        resource: &str,
        record: Record,
        acting_user: Option<&str>,
    ) -> Result<Saved, StoreError> {
        let Some(id) = record.id.clone() else {
            return Err(StoreError::MissingId {
                resource: resource.to_string(),
            });
        };
        let mut patch = record.fields.clone();
        patch.insert(self.updated_at_field.clone(), Value::String(timestamp()));

        let raw = match &id {
            RecordId::Local(_) => {
                return match self.ledger.patch(resource, &id, &patch)? {
                    Some(updated) => {
                        debug!(resource, %id, "updated local entry");
                        Ok(Saved {
                            record: updated,
                            persistence: Persistence::Local,
                        })
                    }
                    None => Err(not_found(resource, &id)),
                };
            }
            RecordId::Remote(raw) => raw.as_str(),
        };

        let filters = self.owner_filters(resource, acting_user).await;
        match self.update_remote(resource, raw, &patch, &filters).await {
            Ok(updated) => Ok(Saved {
                record: updated,
                persistence: Persistence::Remote,
            }),
            Err(error) => {
                surface(resource, &id, &error)?;
                let op = PendingOp::Update {
                    id: raw.to_string(),
                    patch: patch.clone(),
                };
                self.defer(resource, op, error)?;
                let mut queued = record;
                queued.apply_patch(&patch);
                Ok(Saved {
                    record: queued,
                    persistence: Persistence::Pending,
                })
            }
        }
    }

    /// Delete the record with `id` from wherever it lives.
    pub async fn remove(
        &self,
        resource: &str,
        id: &RecordId,
        acting_user: Option<&str>,
    ) -> Result<Persistence, StoreError> {
        let raw = match id {
            RecordId::Local(_) => {
                self.ledger.remove(resource, id)?;
                debug!(resource, %id, "removed local entry");
                return Ok(Persistence::Local);
            }
            RecordId::Remote(raw) => raw.as_str(),
        };

        let filters = self.owner_filters(resource, acting_user).await;
        match self.remote.delete_by_id(resource, raw, &filters).await {
            Ok(()) => Ok(Persistence::Remote),
            Err(error) => {
                surface(resource, id, &error)?;
                self.defer(resource, PendingOp::Delete { id: raw.to_string() }, error)?;
                Ok(Persistence::Pending)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------------

    /// Promote every ledger entry of `resource` and replay its outbox.
    ///
    /// Passes over the same resource are serialized. Each promoted entry is
    /// removed from the ledger as soon as the backend accepts it, so a pass
    /// that fails halfway keeps its progress. An entry edited or removed
    /// while its create was in flight has the difference queued against the
    /// new remote row, and replayed in the same pass. Configured reference
    /// fields pointing at a promoted entry are rewritten to its remote id.
    pub async fn reconcile(&self, resource: &str, acting_user: Option<&str>) -> ReconcileReport {
        self.with_lock(resource, self.reconcile_impl(resource, acting_user))
            .await
    }

    /// Reconcile all registered resources sequentially.
    pub async fn reconcile_all(&self, acting_user: Option<&str>) -> Vec<ReconcileReport> {
        let mut reports = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            reports.push(self.reconcile(resource, acting_user).await);
        }
        reports
    }

    async fn reconcile_impl(&self, resource: &str, acting_user: Option<&str>) -> ReconcileReport {
        let mut report = ReconcileReport::new(resource);
        self.promote_entries(resource, acting_user, &mut report).await;
        self.replay_pending(resource, acting_user, &mut report).await;

        if !report.promoted.is_empty() || report.replayed > 0 || !report.errors.is_empty() {
            info!(
                resource,
                promoted = report.promoted.len(),
                remaining = report.remaining,
                replayed = report.replayed,
                relinked = report.relinked,
                discarded = report.discarded.len(),
                "reconcile pass finished"
            );
        }
        report
    }

    async fn promote_entries(
        &self,
        resource: &str,
        acting_user: Option<&str>,
        report: &mut ReconcileReport,
    ) {
        let owner = self.owner_value(acting_user);
        for entry in self.ledger.load_all(resource) {
            let Some(local_id) = entry.id.clone() else {
                continue;
            };
            let mut fields = entry.fields.clone();
            fields.insert(self.owner_field().to_string(), Value::String(owner.clone()));
            fields.insert(self.updated_at_field.clone(), Value::String(timestamp()));

            let created = match self.create_remote(resource, &fields).await {
                Ok(created) => created,
                Err(error) => {
                    debug!(resource, id = %local_id, %error, "entry not promoted");
                    report.remaining += 1;
                    report.errors.push(ReconcileError::Promote { local_id, error });
                    continue;
                }
            };

            self.retire_promoted(resource, &entry, created.id.as_ref(), report);
            info!(resource, local_id = %local_id, remote_id = ?created.id, "promoted local entry");
            self.events.emit(&StoreEvent::Promoted {
                resource: resource.to_string(),
                local_id: local_id.clone(),
                remote_id: created.id.clone(),
            });
            if let Some(remote_id) = &created.id {
                self.relink(&local_id, remote_id, acting_user, report).await;
            }
            report.promoted.push(Promotion {
                local_id,
                record: created,
            });
        }
    }

    /// Drop a promoted entry from the ledger. Changes made to it while its
    /// create was in flight are queued against the remote row.
    fn retire_promoted(
        &self,
        resource: &str,
        submitted: &Record,
        remote_id: Option<&RecordId>,
        report: &mut ReconcileReport,
    ) {
        let retired = match self.ledger.retire(resource, submitted) {
            Ok(retired) => retired,
            Err(e) => {
                warn!(
                    resource,
                    id = ?submitted.id,
                    error = %e,
                    "promoted entry could not be removed"
                );
                report.errors.push(ReconcileError::Ledger {
                    message: e.to_string(),
                });
                return;
            }
        };
        let Some(remote_id) = remote_id else {
            if retired != Retired::Unchanged {
                warn!(resource, id = ?submitted.id, "backend returned no id, late change dropped");
            }
            return;
        };

        let id = remote_id.as_str().to_string();
        let op = match retired {
            Retired::Unchanged => return,
            Retired::Edited(current) => {
                let patch = field_changes(&submitted.fields, &current.fields);
                if patch.is_empty() {
                    return;
                }
                PendingOp::Update { id, patch }
            }
            Retired::Missing => PendingOp::Delete { id },
        };
        info!(resource, id = ?submitted.id, %remote_id, "entry changed while promoting, queued");
        if let Err(e) = self.ledger.enqueue(resource, op) {
            report.errors.push(ReconcileError::Ledger {
                message: e.to_string(),
            });
        }
    }

    /// Point every configured reference at `local_id` to `remote_id`, both
    /// in the ledger and on rows the backend already holds.
    async fn relink(
        &self,
        local_id: &RecordId,
        remote_id: &RecordId,
        acting_user: Option<&str>,
        report: &mut ReconcileReport,
    ) {
        let (from, to) = (local_id.as_str(), remote_id.as_str());
        for reference in &self.references {
            let ReferenceField { resource, field } = reference;
            match self.ledger.rewrite_reference(resource, field, from, to) {
                Ok(n) => report.relinked += n,
                Err(e) => report.errors.push(ReconcileError::Ledger {
                    message: e.to_string(),
                }),
            }

            let owner = self.owner_filters(resource, acting_user).await;
            let mut filters = owner.clone();
            filters.insert(field.clone(), Value::String(from.to_string()));
            let rows = match self.remote.fetch_all(resource, &filters).await {
                Ok(rows) => rows,
                Err(error) if error.kind == RemoteErrorKind::NotFound => continue,
                Err(error) => {
                    warn!(%resource, %field, %local_id, %error, "could not look up rows to relink");
                    report.errors.push(ReconcileError::Relink {
                        resource: resource.clone(),
                        field: field.clone(),
                        local_id: local_id.clone(),
                        error,
                    });
                    continue;
                }
            };

            let mut patch = Map::new();
            patch.insert(field.clone(), Value::String(to.to_string()));
            for row in rows {
                let Some(RecordId::Remote(id)) = row.id else {
                    continue;
                };
                match self.update_remote(resource, &id, &patch, &owner).await {
                    Ok(_) => report.relinked += 1,
                    Err(error) => {
                        warn!(%resource, %field, %id, %error, "could not relink remote row");
                        report.errors.push(ReconcileError::Relink {
                            resource: resource.clone(),
                            field: field.clone(),
                            local_id: local_id.clone(),
                            error,
                        });
                    }
                }
            }
        }
    }

    async fn replay_pending(
        &self,
        resource: &str,
        acting_user: Option<&str>,
        report: &mut ReconcileReport,
    ) {
        let ops = self.ledger.load_pending(resource);
        if ops.is_empty() {
            return;
        }
        let filters = self.owner_filters(resource, acting_user).await;
        let mut settled = Vec::with_capacity(ops.len());

        for op in ops {
            let outcome = match &op {
                PendingOp::Update { id, patch } => self
                    .update_remote(resource, id, patch, &filters)
                    .await
                    .map(|_| ()),
                PendingOp::Delete { id } => self.remote.delete_by_id(resource, id, &filters).await,
            };

            match outcome {
                Ok(()) => {
                    report.replayed += 1;
                    self.events.emit(&StoreEvent::Replayed {
                        resource: resource.to_string(),
                        op: op.clone(),
                    });
                    settled.push(op);
                }
                Err(error) if is_final(error.kind) => {
                    warn!(resource, id = op.id(), %error, "queued op rejected, discarding");
                    self.events.emit(&StoreEvent::Discarded {
                        resource: resource.to_string(),
                        op: op.clone(),
                        error: error.clone(),
                    });
                    report.discarded.push(DiscardedOp {
                        op: op.clone(),
                        error,
                    });
                    settled.push(op);
                }
                Err(error) => {
                    debug!(resource, id = op.id(), %error, "queued op kept");
                    report.errors.push(ReconcileError::Replay { op, error });
                }
            }
        }

        if let Err(e) = self.ledger.settle_pending(resource, &settled) {
            warn!(resource, error = %e, "settled ops could not be removed from the outbox");
            report.errors.push(ReconcileError::Ledger {
                message: e.to_string(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    async fn owner_filters(&self, resource: &str, acting_user: Option<&str>) -> Filters {
        self.ownership
            .owner_filters(self.remote.as_ref(), resource, acting_user)
            .await
    }

    fn owner_value(&self, acting_user: Option<&str>) -> String {
        acting_user
            .map(str::to_string)
            .unwrap_or_else(|| self.placeholder_owner.clone())
    }

    /// `create`, retried once without the owner field when the backend does
    /// not know that column.
    async fn create_remote(
        &self,
        resource: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        match self.remote.create(resource, fields).await {
            Err(error)
                if error.kind == RemoteErrorKind::SchemaIncompatible
                    && fields.contains_key(self.owner_field()) =>
            {
                debug!(resource, %error, "retrying create without the owner field");
                let mut without_owner = fields.clone();
                without_owner.remove(self.owner_field());
                self.remote.create(resource, &without_owner).await
            }
            other => other,
        }
    }

    /// `update_by_id` with the same owner-field retry as [`Self::create_remote`].
    async fn update_remote(
        &self,
        resource: &str,
        id: &str,
        patch: &Map<String, Value>,
        filters: &Filters,
    ) -> Result<Record, RemoteError> {
        match self.remote.update_by_id(resource, id, patch, filters).await {
            Err(error)
                if error.kind == RemoteErrorKind::SchemaIncompatible
                    && patch.contains_key(self.owner_field()) =>
            {
                debug!(resource, id, %error, "retrying update without the owner field");
                let mut without_owner = patch.clone();
                without_owner.remove(self.owner_field());
                self.remote
                    .update_by_id(resource, id, &without_owner, filters)
                    .await
            }
            other => other,
        }
    }

    fn defer(&self, resource: &str, op: PendingOp, error: RemoteError) -> Result<(), StoreError> {
        self.ledger.enqueue(resource, op.clone())?;
        warn!(resource, id = op.id(), %error, "remote write failed, queued for replay");
        self.events.emit(&StoreEvent::Deferred {
            resource: resource.to_string(),
            op,
            error,
        });
        Ok(())
    }

    async fn with_lock<T, F: Future<Output = T>>(&self, resource: &str, f: F) -> T {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(resource.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;
        f.await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn not_found(resource: &str, id: &RecordId) -> StoreError {
    StoreError::NotFound {
        resource: resource.to_string(),
        id: id.to_string(),
    }
}

/// Map the errors a caller must see; `Ok` means the failure can be deferred.
fn surface(resource: &str, id: &RecordId, error: &RemoteError) -> Result<(), StoreError> {
    match error.kind {
        RemoteErrorKind::PermissionDenied => Err(StoreError::PermissionDenied {
            resource: resource.to_string(),
            id: id.to_string(),
        }),
        RemoteErrorKind::NotFound => Err(not_found(resource, id)),
        _ => Ok(()),
    }
}

/// Replay outcomes after which retrying cannot help.
fn is_final(kind: RemoteErrorKind) -> bool {
    kind.is_actionable() || kind == RemoteErrorKind::SchemaIncompatible
}

/// Fields of `after` that differ from `before`. Fields dropped in `after`
/// are cleared with `null`.
fn field_changes(before: &Map<String, Value>, after: &Map<String, Value>) -> Map<String, Value> {
    let mut changes: Map<String, Value> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for key in before.keys().filter(|key| !after.contains_key(*key)) {
        changes.insert(key.clone(), Value::Null);
    }
    changes
}

fn overlay_pending(rows: Vec<Record>, pending: &[PendingOp]) -> Vec<Record> {
    if pending.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter_map(|mut row| {
            let Some(id) = row.id.as_ref().map(|id| id.as_str().to_string()) else {
                return Some(row);
            };
            for op in pending.iter().filter(|op| op.id() == id) {
                match op {
                    PendingOp::Delete { .. } => return None,
                    PendingOp::Update { patch, .. } => row.apply_patch(patch),
                }
            }
            Some(row)
        })
        .collect()
}
