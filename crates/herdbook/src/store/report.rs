use crate::error::RemoteError;
use crate::ledger::PendingOp;
use crate::types::{Record, RecordId};

/// A ledger entry that now exists remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub local_id: RecordId,
    /// The row as returned by the backend, carrying its remote id.
    pub record: Record,
}

/// A queued op the backend rejected for good.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardedOp {
    pub op: PendingOp,
    pub error: RemoteError,
}

/// Something a reconcile pass could not finish. Collected, never thrown.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// The entry stays in the ledger for the next pass.
    Promote { local_id: RecordId, error: RemoteError },
    /// The op stays queued for the next pass.
    Replay { op: PendingOp, error: RemoteError },
    /// Remote rows of `resource` still pointing at `local_id` could not be
    /// found or rewritten.
    Relink {
        resource: String,
        field: String,
        local_id: RecordId,
        error: RemoteError,
    },
    /// The remote side succeeded but the ledger could not be updated.
    Ledger { message: String },
}

/// Outcome of reconciling one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub resource: String,
    pub promoted: Vec<Promotion>,
    /// Ledger entries that could not be promoted.
    pub remaining: usize,
    /// Queued ops applied remotely.
    pub replayed: usize,
    /// Reference fields rewritten from a promoted local id to its remote id.
    pub relinked: usize,
    pub discarded: Vec<DiscardedOp>,
    pub errors: Vec<ReconcileError>,
}

impl ReconcileReport {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }

    /// Nothing left behind in the ledger or the outbox.
    pub fn is_settled(&self) -> bool {
        self.remaining == 0
            && !self
                .errors
                .iter()
                .any(|e| matches!(e, ReconcileError::Replay { .. }))
    }

    pub fn merge(&mut self, other: ReconcileReport) {
        self.promoted.extend(other.promoted);
        self.remaining += other.remaining;
        self.replayed += other.replayed;
        self.discarded.extend(other.discarded);
        self.errors.extend(other.errors);
    }
}
