//! Persistence events for callers that want to surface sync state
//! ("saved on this device", "synced", "changes queued").
//!
//! Listeners are `Arc<dyn Fn(&StoreEvent)>`. Emission works on a snapshot of
//! the listener list taken under the lock, so listeners may subscribe or
//! unsubscribe from inside a callback. A panicking listener is contained and
//! never breaks the store operation that emitted the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RemoteError;
use crate::ledger::PendingOp;
use crate::types::RecordId;

/// Handle returned by [`StoreEvents::subscribe`].
pub type ListenerId = u64;

pub type StoreListener = dyn Fn(&StoreEvent) + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A create could not reach the backend; the record lives in the ledger.
    SavedLocally {
        resource: String,
        id: RecordId,
        error: RemoteError,
    },
    /// A ledger entry was created remotely and retired locally.
    Promoted {
        resource: String,
        local_id: RecordId,
        remote_id: Option<RecordId>,
    },
    /// An update or delete of a remote record was queued for replay.
    Deferred {
        resource: String,
        op: PendingOp,
        error: RemoteError,
    },
    /// A queued op was applied remotely.
    Replayed { resource: String, op: PendingOp },
    /// A queued op was rejected by the backend and discarded.
    Discarded {
        resource: String,
        op: PendingOp,
        error: RemoteError,
    },
    /// `list` fell back to local entries only.
    DegradedRead {
        resource: String,
        error: RemoteError,
    },
}

#[derive(Default)]
pub struct StoreEvents {
    listeners: Mutex<Vec<(ListenerId, Arc<StoreListener>)>>,
    next_id: AtomicU64,
}

impl StoreEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Safe to call with an unknown or already-removed id.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn emit(&self, event: &StoreEvent) {
        let snapshot: Vec<Arc<StoreListener>> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(event)));
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
