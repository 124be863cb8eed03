//! Typed access to one resource of a [`ResilientStore`].
//!
//! A [`Resource`] is a serde type stored under a fixed resource name. Its
//! JSON object form is the record's field map; the id, owner and timestamps
//! are managed by the store and travel next to the value in [`Entry`].

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::store::{ReconcileReport, ResilientStore};
use crate::types::{Persistence, Record, RecordId};

pub trait Resource: Serialize + DeserializeOwned + Send + Sync {
    /// Remote table / ledger key of this resource.
    const NAME: &'static str;

    /// Every field the serialized form can carry, including ones skipped
    /// when empty. An update writes `null` to those the value leaves out.
    const FIELDS: &'static [&'static str];
}

/// A decoded record and the metadata the store keeps around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<R> {
    pub id: RecordId,
    pub value: R,
    /// Fields not part of `R` (owner, timestamps, backend columns).
    pub extra: Map<String, Value>,
}

impl<R> Entry<R> {
    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }
}

#[derive(Debug)]
pub struct TypedList<R> {
    pub entries: Vec<Entry<R>>,
    /// Records that did not decode as `R`. They are skipped, not fatal.
    pub errors: Vec<StoreError>,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedSaved<R> {
    pub entry: Entry<R>,
    pub persistence: Persistence,
}

pub struct TypedStore<R> {
    store: Arc<ResilientStore>,
    _resource: PhantomData<fn() -> R>,
}

impl<R> Clone for TypedStore<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> TypedStore<R> {
    pub fn new(store: Arc<ResilientStore>) -> Self {
        Self {
            store,
            _resource: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<ResilientStore> {
        &self.store
    }

    pub async fn list(&self, acting_user: Option<&str>) -> TypedList<R> {
        let listed = self.store.list(R::NAME, acting_user).await;
        let mut entries = Vec::with_capacity(listed.records.len());
        let mut errors = Vec::new();
        for record in listed.records {
            match decode::<R>(record) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
        TypedList {
            entries,
            errors,
            degraded: listed.degraded,
        }
    }

    pub async fn add(
        &self,
        value: &R,
        acting_user: Option<&str>,
    ) -> Result<TypedSaved<R>, StoreError> {
        let fields = encode(value)?;
        let saved = self.store.add(R::NAME, fields, acting_user).await?;
        into_saved(saved.record, saved.persistence)
    }

    /// Overwrite the fields of `R` on the record with `id`. Fields of `R`
    /// that `value` leaves out are cleared; fields outside `R` are left
    /// untouched.
    pub async fn update(
        &self,
        id: &RecordId,
        value: &R,
        acting_user: Option<&str>,
    ) -> Result<TypedSaved<R>, StoreError> {
        let mut fields = encode(value)?;
        for field in R::FIELDS {
            if !fields.contains_key(*field) {
                fields.insert(field.to_string(), Value::Null);
            }
        }
        let record = Record::with_id(id.clone(), fields);
        let saved = self.store.update(R::NAME, record, acting_user).await?;
        into_saved(saved.record, saved.persistence)
    }

    pub async fn remove(
        &self,
        id: &RecordId,
        acting_user: Option<&str>,
    ) -> Result<Persistence, StoreError> {
        self.store.remove(R::NAME, id, acting_user).await
    }

    pub async fn reconcile(&self, acting_user: Option<&str>) -> ReconcileReport {
        self.store.reconcile(R::NAME, acting_user).await
    }
}

fn encode<R: Resource>(value: &R) -> Result<Map<String, Value>, StoreError> {
    let encode_err = |source| StoreError::Encode {
        resource: R::NAME.to_string(),
        source,
    };
    match serde_json::to_value(value).map_err(encode_err)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(encode_err(serde::ser::Error::custom(
            "resource must serialize to a JSON object",
        ))),
    }
}

/// `Ok(None)` for rows without an id, which cannot be addressed anyway.
fn decode<R: Resource>(record: Record) -> Result<Option<Entry<R>>, StoreError> {
    let Some(id) = record.id else {
        return Ok(None);
    };
    let value: R = serde_json::from_value(Value::Object(record.fields.clone())).map_err(|source| {
        StoreError::Decode {
            resource: R::NAME.to_string(),
            id: id.to_string(),
            source,
        }
    })?;
    let known = match serde_json::to_value(&value) {
        Ok(Value::Object(known)) => known,
        _ => Map::new(),
    };
    let extra = record
        .fields
        .into_iter()
        .filter(|(key, _)| !known.contains_key(key) && !R::FIELDS.contains(&key.as_str()))
        .collect();
    Ok(Some(Entry { id, value, extra }))
}

fn into_saved<R: Resource>(
    record: Record,
    persistence: Persistence,
) -> Result<TypedSaved<R>, StoreError> {
    match decode::<R>(record)? {
        Some(entry) => Ok(TypedSaved { entry, persistence }),
        None => Err(StoreError::MissingId {
            resource: R::NAME.to_string(),
        }),
    }
}
