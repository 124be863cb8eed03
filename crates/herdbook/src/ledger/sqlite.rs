//! SQLite ledger backend.
//!
//! One `ledger(key, value)` table in a file-backed or in-memory database,
//! via rusqlite (bundled). The connection sits behind a `parking_lot::Mutex`;
//! every call is a single statement so no transaction is needed.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::LedgerError;

use super::traits::LedgerBackend;

pub struct SqliteLedgerBackend {
    conn: Mutex<Connection>,
}

impl SqliteLedgerBackend {
    /// Open (or create) a file-backed ledger database.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS ledger (
                 key   TEXT PRIMARY KEY NOT NULL,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl LedgerBackend for SqliteLedgerBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, LedgerError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM ledger WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ledger (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM ledger WHERE key = ?1", params![key])?;
        Ok(())
    }
}
