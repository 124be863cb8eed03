//! Store configuration, loadable from TOML.
//!
//! ```toml
//! [store]
//! owner_field = "user_id"
//! sentinel_prefix = "local_"
//! resources = ["cattle", "horses"]
//! references = [{ resource = "health_records", field = "animal_id" }]
//!
//! [remote]
//! base_url = "https://example.supabase.co"
//! api_key = "anon-key"
//! timeout_ms = 10000
//!
//! [reconcile]
//! interval_secs = 300
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ledger::{LedgerBackend, DEFAULT_KEY_PREFIX};
use crate::ownership::DEFAULT_OWNER_FIELD;
use crate::remote::RemoteCollection;
use crate::store::{
    ReferenceField, StoreOptions, DEFAULT_CREATED_AT_FIELD, DEFAULT_UPDATED_AT_FIELD,
};
use crate::types::{SentinelPrefix, PLACEHOLDER_OWNER};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HerdbookConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_owner_field")]
    pub owner_field: String,

    #[serde(default = "default_created_at_field")]
    pub created_at_field: String,

    #[serde(default = "default_updated_at_field")]
    pub updated_at_field: String,

    /// Owner stamped on records created without a signed-in user
    #[serde(default = "default_placeholder_owner")]
    pub placeholder_owner: String,

    /// Prefix of locally minted ids: `local_` or `temp-`
    #[serde(default)]
    pub sentinel_prefix: SentinelPrefix,

    /// Prefix of ledger storage keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Resources visited by `reconcile_all`
    #[serde(default = "default_resources")]
    pub resources: Vec<String>,

    /// Fields relinked when the record they point at is promoted
    #[serde(default = "crate::farm::reference_fields")]
    pub references: Vec<ReferenceField>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            owner_field: default_owner_field(),
            created_at_field: default_created_at_field(),
            updated_at_field: default_updated_at_field(),
            placeholder_owner: default_placeholder_owner(),
            sentinel_prefix: SentinelPrefix::default(),
            key_prefix: default_key_prefix(),
            resources: default_resources(),
            references: crate::farm::reference_fields(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Backend base URL (PostgREST adapter)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Public API key sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Deadline for one remote call; 0 disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Periodic reconcile interval; unset means on demand only
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Cooldown between coalesced passes
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            throttle_ms: default_throttle_ms(),
        }
    }
}

fn default_owner_field() -> String {
    DEFAULT_OWNER_FIELD.to_string()
}

fn default_created_at_field() -> String {
    DEFAULT_CREATED_AT_FIELD.to_string()
}

fn default_updated_at_field() -> String {
    DEFAULT_UPDATED_AT_FIELD.to_string()
}

fn default_placeholder_owner() -> String {
    PLACEHOLDER_OWNER.to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_throttle_ms() -> u64 {
    1_000
}

fn default_resources() -> Vec<String> {
    crate::farm::RESOURCE_NAMES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl HerdbookConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let store = &self.store;
        for (field, value) in [
            ("store.owner_field", &store.owner_field),
            ("store.created_at_field", &store.created_at_field),
            ("store.updated_at_field", &store.updated_at_field),
            ("store.placeholder_owner", &store.placeholder_owner),
            ("store.key_prefix", &store.key_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        if [&store.owner_field, &store.created_at_field, &store.updated_at_field]
            .iter()
            .any(|f| f.as_str() == crate::types::ID_FIELD)
        {
            return Err(invalid("store", "field names must not be \"id\""));
        }
        if let Some(name) = store.resources.iter().find(|r| r.trim().is_empty()) {
            return Err(invalid("store.resources", &format!("invalid resource name {name:?}")));
        }
        if let Some(r) = store
            .references
            .iter()
            .find(|r| r.resource.trim().is_empty() || r.field.trim().is_empty())
        {
            return Err(invalid("store.references", &format!("incomplete reference {r:?}")));
        }
        if self.reconcile.interval_secs == Some(0) {
            return Err(invalid("reconcile.interval_secs", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Option<Duration> {
        (self.remote.timeout_ms > 0).then(|| Duration::from_millis(self.remote.timeout_ms))
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        self.reconcile.interval_secs.map(Duration::from_secs)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.reconcile.throttle_ms)
    }

    /// Store options for the given collaborators, with every configured
    /// field filled in.
    pub fn store_options(
        &self,
        remote: Arc<dyn RemoteCollection>,
        ledger_backend: Arc<dyn LedgerBackend>,
    ) -> StoreOptions {
        let store = &self.store;
        StoreOptions {
            resources: store.resources.clone(),
            references: store.references.clone(),
            owner_field: Some(store.owner_field.clone()),
            created_at_field: Some(store.created_at_field.clone()),
            updated_at_field: Some(store.updated_at_field.clone()),
            placeholder_owner: Some(store.placeholder_owner.clone()),
            sentinel_prefix: Some(store.sentinel_prefix),
            key_prefix: Some(store.key_prefix.clone()),
            ..StoreOptions::new(remote, ledger_backend)
        }
    }

    #[cfg(feature = "rest")]
    pub fn postgrest_options(&self) -> Result<crate::remote::PostgrestOptions, ConfigError> {
        let base_url = self
            .remote
            .base_url
            .clone()
            .ok_or_else(|| invalid("remote.base_url", "required for the PostgREST adapter"))?;
        let api_key = self
            .remote
            .api_key
            .clone()
            .ok_or_else(|| invalid("remote.api_key", "required for the PostgREST adapter"))?;
        Ok(crate::remote::PostgrestOptions {
            base_url,
            api_key,
            access_token: None,
        })
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
