//! Key/value backend trait for the local ledger.
//!
//! Modelled on browser local storage: string keys, string values, no
//! transactions. The ledger layers JSON arrays and its own locking on top.

use crate::error::LedgerError;

/// Raw persistent storage for ledger entries.
///
/// Implementors must be `Send + Sync` so they can be shared across tasks.
pub trait LedgerBackend: Send + Sync {
    /// Read the value stored under `key`. `Ok(None)` when absent.
    fn get_item(&self, key: &str) -> Result<Option<String>, LedgerError>;

    /// Insert or overwrite the value under `key`.
    fn set_item(&self, key: &str, value: &str) -> Result<(), LedgerError>;

    /// Delete `key`. Deleting an absent key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), LedgerError>;
}
