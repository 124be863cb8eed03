//! Remote collection contract.
//!
//! `RemoteCollection` is the narrow interface the store needs from a hosted
//! backend: single-attempt CRUD on a named resource plus a column probe.
//! Implementations classify every failure into a [`RemoteErrorKind`] and never
//! retry; retry and fallback policy belongs to the store.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{RemoteError, RemoteErrorKind};
use crate::types::{Filters, Record};

#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Report whether `field` can be queried on `resource`.
    ///
    /// Implementations issue the smallest possible read touching only the
    /// field and feed its outcome through [`probe_outcome`].
    async fn probe_column(&self, resource: &str, field: &str) -> bool;

    /// Insert a record. The backend assigns the id (and timestamps when
    /// absent) and returns the stored row.
    async fn create(
        &self,
        resource: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError>;

    /// Read every row matching all equality `filters`.
    async fn fetch_all(&self, resource: &str, filters: &Filters)
        -> Result<Vec<Record>, RemoteError>;

    /// Read one row by id. `Ok(None)` when no row has that id.
    async fn fetch_by_id(&self, resource: &str, id: &str) -> Result<Option<Record>, RemoteError>;

    /// Patch the row with `id` that also matches `filters`.
    ///
    /// Zero matched rows is an error: `NotFound` when the id is unknown,
    /// `PermissionDenied` when the filters excluded it.
    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        patch: &Map<String, Value>,
        filters: &Filters,
    ) -> Result<Record, RemoteError>;

    /// Delete the row with `id` that also matches `filters`. Same zero-row
    /// rule as [`RemoteCollection::update_by_id`].
    async fn delete_by_id(&self, resource: &str, id: &str, filters: &Filters)
        -> Result<(), RemoteError>;
}

/// Fail-open interpretation of a probe read: only an unambiguous "column does
/// not exist" answer disables the column.
pub fn probe_outcome(result: Result<(), RemoteError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => e.kind != RemoteErrorKind::SchemaIncompatible,
    }
}

/// Zero-row classification for adapters that cannot tell a missing id from a
/// filtered-out one.
pub fn zero_rows_error(resource: &str, id: &str, filters: &Filters) -> RemoteError {
    if filters.is_empty() {
        RemoteError::not_found(format!("{resource}/{id} matched no rows"))
    } else {
        RemoteError::permission_denied(format!(
            "{resource}/{id} matched no rows under the ownership constraint"
        ))
    }
}
