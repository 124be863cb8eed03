//! Core record types shared by the remote adapters, the local ledger and the
//! store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Field holding a record's identifier in its JSON form.
pub const ID_FIELD: &str = "id";

/// Owner recorded when a record is created without a signed-in user.
pub const PLACEHOLDER_OWNER: &str = "00000000-0000-0000-0000-000000000000";

// ============================================================================
// Sentinel prefixes
// ============================================================================

/// Prefixes that mark an identifier as minted on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SentinelPrefix {
    #[default]
    #[serde(rename = "local_")]
    Local,
    #[serde(rename = "temp-")]
    Temp,
}

impl SentinelPrefix {
    pub const ALL: [SentinelPrefix; 2] = [SentinelPrefix::Local, SentinelPrefix::Temp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local_",
            Self::Temp => "temp-",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

static LAST_SENTINEL: AtomicU64 = AtomicU64::new(0);

/// Nanosecond timestamp, bumped so that two ids minted in the same process
/// never collide even when the clock does not advance.
fn next_disambiguator() -> u64 {
    let now = chrono::Utc::now()
        .timestamp_nanos_opt()
        .map(|n| n.max(0) as u64)
        .unwrap_or(0);
    let mut last = LAST_SENTINEL.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_SENTINEL.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

// ============================================================================
// RecordId
// ============================================================================

/// Identifier of a record: either assigned by the backend or minted locally
/// while the backend was out of reach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Remote(String),
    Local(String),
}

impl RecordId {
    /// Classify a persisted identifier by its prefix.
    ///
    /// Only used where ids cross a storage boundary (ledger JSON, caller
    /// input). Ids returned by a remote adapter are built with
    /// [`RecordId::Remote`] directly.
    pub fn parse(raw: &str) -> Self {
        if SentinelPrefix::ALL
            .iter()
            .any(|p| raw.starts_with(p.as_str()) && raw.len() > p.as_str().len())
        {
            Self::Local(raw.to_string())
        } else {
            Self::Remote(raw.to_string())
        }
    }

    /// Mint a fresh local identifier: prefix followed by a high-resolution
    /// timestamp.
    pub fn mint_local(prefix: SentinelPrefix) -> Self {
        Self::Local(format!("{}{}", prefix.as_str(), next_disambiguator()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Remote(s) | Self::Local(s) => s,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

// ============================================================================
// Record
// ============================================================================

/// One domain entity: an identifier plus arbitrary JSON fields.
///
/// `fields` never contains the `id` key; it is lifted into `id` on the way
/// in and put back by [`Record::to_value`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub id: Option<RecordId>,
    pub fields: Map<String, Value>,
}

impl Record {
    /// A record with no identifier yet.
    pub fn draft(fields: Map<String, Value>) -> Self {
        let mut record = Self { id: None, fields };
        record.fields.remove(ID_FIELD);
        record
    }

    pub fn with_id(id: RecordId, fields: Map<String, Value>) -> Self {
        let mut record = Self::draft(fields);
        record.id = Some(id);
        record
    }

    /// Build from a JSON object whose `id` (if any) was assigned by the
    /// backend.
    pub fn from_remote(mut object: Map<String, Value>) -> Self {
        let id = object.remove(ID_FIELD).and_then(|v| id_string(&v)).map(RecordId::Remote);
        Self { id, fields: object }
    }

    /// Build from a JSON object whose `id` must be classified by prefix.
    pub fn from_object(mut object: Map<String, Value>) -> Self {
        let id = object
            .remove(ID_FIELD)
            .and_then(|v| id_string(&v))
            .map(|s| RecordId::parse(&s));
        Self { id, fields: object }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        if field == ID_FIELD {
            return;
        }
        self.fields.insert(field, value.into());
    }

    /// Shallow merge of `patch` into this record's fields. An `id` key in the
    /// patch is ignored.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            if key != ID_FIELD {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn is_local(&self) -> bool {
        self.id.as_ref().is_some_and(RecordId::is_local)
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        if let Some(id) = &self.id {
            object.insert(ID_FIELD.to_string(), Value::String(id.as_str().to_string()));
        }
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_object(object))
    }
}

// ============================================================================
// Filters / outcomes
// ============================================================================

/// Equality constraints applied to a remote query: field → required value.
pub type Filters = BTreeMap<String, Value>;

/// Where a write ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Committed to the backend.
    Remote,
    /// Stored only in the local ledger under a local id.
    Local,
    /// Applied to the returned copy and queued for replay against the backend.
    Pending,
}

/// Result of a successful `add` or `update`.
#[derive(Debug, Clone, PartialEq)]
pub struct Saved {
    pub record: Record,
    pub persistence: Persistence,
}

/// Result of `list`. `degraded` is set when the backend could not be read
/// and only local entries are returned.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub records: Vec<Record>,
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
