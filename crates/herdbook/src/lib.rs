//! Offline-tolerant record store for farm records.
//!
//! Writes go to a hosted backend first and fall back to a per-device ledger
//! under locally minted ids. Reconciliation promotes local entries and
//! replays queued mutations once the backend is reachable again.

pub mod error;
pub mod types;

pub mod config;
pub mod events;
pub mod farm;
pub mod ledger;
pub mod ownership;
pub mod remote;
pub mod resource;
pub mod scheduler;
pub mod store;

pub use error::{HerdbookError, RemoteError, RemoteErrorKind, Result, StoreError};
pub use events::{StoreEvent, StoreEvents};
pub use resource::{Entry, Resource, TypedStore};
pub use scheduler::ReconcileScheduler;
pub use store::{ReconcileReport, ResilientStore, StoreOptions};
pub use types::{ListResult, Persistence, Record, RecordId, Saved, SentinelPrefix};
