//! TimeoutRemote: bounds every call of an inner adapter.
//!
//! An expired deadline is reported as `Unreachable`, so the store degrades
//! exactly as it would for a dropped connection. A probe that times out
//! fails open like any other ambiguous probe error.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::RemoteError;
use crate::types::{Filters, Record};

use super::traits::RemoteCollection;

pub struct TimeoutRemote<R> {
    inner: R,
    timeout: Duration,
}

impl<R: RemoteCollection> TimeoutRemote<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        op: &str,
        resource: &str,
        fut: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    op,
                    resource,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "remote call timed out"
                );
                Err(RemoteError::unreachable(format!(
                    "{op} on {resource} timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[async_trait]
impl<R: RemoteCollection> RemoteCollection for TimeoutRemote<R> {
    async fn probe_column(&self, resource: &str, field: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.inner.probe_column(resource, field)).await {
            Ok(present) => present,
            Err(_) => {
                warn!(resource, field, "column probe timed out, assuming present");
                true
            }
        }
    }

    async fn create(
        &self,
        resource: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        self.bounded("create", resource, self.inner.create(resource, fields))
            .await
    }

    async fn fetch_all(
        &self,
        resource: &str,
        filters: &Filters,
    ) -> Result<Vec<Record>, RemoteError> {
        self.bounded("fetch_all", resource, self.inner.fetch_all(resource, filters))
            .await
    }

    async fn fetch_by_id(&self, resource: &str, id: &str) -> Result<Option<Record>, RemoteError> {
        self.bounded("fetch_by_id", resource, self.inner.fetch_by_id(resource, id))
            .await
    }

    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        patch: &Map<String, Value>,
        filters: &Filters,
    ) -> Result<Record, RemoteError> {
        self.bounded(
            "update_by_id",
            resource,
            self.inner.update_by_id(resource, id, patch, filters),
        )
        .await
    }

    async fn delete_by_id(
        &self,
        resource: &str,
        id: &str,
        filters: &Filters,
    ) -> Result<(), RemoteError> {
        self.bounded(
            "delete_by_id",
            resource,
            self.inner.delete_by_id(resource, id, filters),
        )
        .await
    }
}
