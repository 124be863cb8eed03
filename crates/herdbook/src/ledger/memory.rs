//! In-memory ledger backend. Survives nothing; used in tests and as the
//! fallback when no durable storage is configured.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::LedgerError;

use super::traits::LedgerBackend;

#[derive(Debug, Default)]
pub struct MemoryLedgerBackend {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryLedgerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every key currently stored.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.items.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl LedgerBackend for MemoryLedgerBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), LedgerError> {
        self.items.lock().remove(key);
        Ok(())
    }
}
