use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ledger::LedgerBackend;
use crate::remote::RemoteCollection;
use crate::types::SentinelPrefix;

pub const DEFAULT_CREATED_AT_FIELD: &str = "created_at";
pub const DEFAULT_UPDATED_AT_FIELD: &str = "updated_at";

/// A field of `resource` holding the id of another record. When that record
/// is promoted, the field is rewritten from its local id to its remote id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceField {
    pub resource: String,
    pub field: String,
}

impl ReferenceField {
    pub fn new(resource: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            field: field.into(),
        }
    }
}

/// Everything a [`ResilientStore`](super::ResilientStore) is built from.
/// `None` fields fall back to their defaults.
pub struct StoreOptions {
    pub remote: Arc<dyn RemoteCollection>,
    pub ledger_backend: Arc<dyn LedgerBackend>,
    /// Resources visited by `reconcile_all`, in order.
    pub resources: Vec<String>,
    /// Fields relinked when the record they point at is promoted
    pub references: Vec<ReferenceField>,
    /// Ownership field (default: `user_id`)
    pub owner_field: Option<String>,
    /// Creation timestamp field (default: `created_at`)
    pub created_at_field: Option<String>,
    /// Modification timestamp field (default: `updated_at`)
    pub updated_at_field: Option<String>,
    /// Owner written when no user is signed in (default: the nil UUID)
    pub placeholder_owner: Option<String>,
    /// Prefix for minted local ids (default: `local_`)
    pub sentinel_prefix: Option<SentinelPrefix>,
    /// Prefix of ledger storage keys (default: `local_`)
    pub key_prefix: Option<String>,
}

impl StoreOptions {
    pub fn new(remote: Arc<dyn RemoteCollection>, ledger_backend: Arc<dyn LedgerBackend>) -> Self {
        Self {
            remote,
            ledger_backend,
            resources: Vec::new(),
            references: Vec::new(),
            owner_field: None,
            created_at_field: None,
            updated_at_field: None,
            placeholder_owner: None,
            sentinel_prefix: None,
            key_prefix: None,
        }
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_references(mut self, references: impl IntoIterator<Item = ReferenceField>) -> Self {
        self.references = references.into_iter().collect();
        self
    }
}
