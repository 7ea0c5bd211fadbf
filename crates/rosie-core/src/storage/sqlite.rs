use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::Error;

const SCHEMA_VERSION: i64 = 1;

/// Durable, append-only event log backed by a single SQLite connection.
///
/// The connection sits behind a mutex, so appends are serialized and every
/// read observes a committed prefix.
pub struct EventLog {
    conn: Mutex<Connection>,
}

impl EventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let log = EventLog {
            conn: Mutex::new(conn),
        };
        log.configure_pragmas()?;
        log.migrate_schema()?;
        debug!("Event log opened at {}", path.display());
        Ok(log)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        let log = EventLog {
            conn: Mutex::new(conn),
        };
        log.configure_pragmas()?;
        log.migrate_schema()?;
        Ok(log)
    }

    fn configure_pragmas(&self) -> Result<(), Error> {
        // FULL so an append is durable once it returns.
        self.connection()?.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, synchronous FULL)");
        Ok(())
    }

    /// Create the events table on first open. Records are never dropped:
    /// the log is the source of truth, unlike derived projections.
    fn migrate_schema(&self) -> Result<(), Error> {
        let conn = self.connection()?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(Error::Other(format!(
                "event log schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }
        conn.execute_batch(include_str!("schema.sql"))?;
        debug!("Event log schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock event log: {}", e)))
    }
}
