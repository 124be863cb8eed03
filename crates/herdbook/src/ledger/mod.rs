pub mod local_ledger;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use local_ledger::{LocalLedger, PendingOp, Retired, DEFAULT_KEY_PREFIX};
pub use memory::MemoryLedgerBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedgerBackend;
pub use traits::LedgerBackend;
