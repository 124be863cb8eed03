//! Ownership scoping with graceful schema evolution.
//!
//! Older deployments may predate the owner column, so the filter is only
//! applied when a signed-in user exists *and* the backend reports the column
//! as present. The probe fails open: only an explicit "column does not
//! exist" disables filtering.

use serde_json::Value;
use tracing::debug;

use crate::remote::RemoteCollection;
use crate::types::Filters;

/// Default name of the ownership field.
pub const DEFAULT_OWNER_FIELD: &str = "user_id";

#[derive(Debug, Clone)]
pub struct OwnershipFilter {
    owner_field: String,
}

impl Default for OwnershipFilter {
    fn default() -> Self {
        Self::new(DEFAULT_OWNER_FIELD)
    }
}

impl OwnershipFilter {
    pub fn new(owner_field: impl Into<String>) -> Self {
        Self {
            owner_field: owner_field.into(),
        }
    }

    pub fn owner_field(&self) -> &str {
        &self.owner_field
    }

    /// Whether remote operations on `resource` should be constrained to rows
    /// owned by `acting_user`.
    pub async fn should_filter_by_owner(
        &self,
        remote: &dyn RemoteCollection,
        resource: &str,
        acting_user: Option<&str>,
    ) -> bool {
        if acting_user.is_none() {
            return false;
        }
        let present = remote.probe_column(resource, &self.owner_field).await;
        if !present {
            debug!(
                resource,
                field = %self.owner_field,
                "owner column absent, ownership filter disabled"
            );
        }
        present
    }

    /// Equality filters for `acting_user`, empty when ownership does not
    /// apply.
    pub async fn owner_filters(
        &self,
        remote: &dyn RemoteCollection,
        resource: &str,
        acting_user: Option<&str>,
    ) -> Filters {
        let mut filters = Filters::new();
        if let Some(user) = acting_user {
            if self.should_filter_by_owner(remote, resource, acting_user).await {
                filters.insert(self.owner_field.clone(), Value::String(user.to_string()));
            }
        }
        filters
    }
}
