pub mod options;
pub mod report;
pub mod resilient;

pub use options::{ReferenceField, StoreOptions, DEFAULT_CREATED_AT_FIELD, DEFAULT_UPDATED_AT_FIELD};
pub use report::{DiscardedOp, Promotion, ReconcileError, ReconcileReport};
pub use resilient::ResilientStore;
