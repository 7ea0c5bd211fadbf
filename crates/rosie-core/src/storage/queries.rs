use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, warn};

use super::models::{compute_checksum, AuditReport, ChecksumMismatch, EventRecord};
use super::sqlite::EventLog;
use crate::error::Error;
use crate::events::{canonical_json, DomainEvent, SCHEMA_VERSION};

impl EventLog {
    // ── Append ───────────────────────────────────────────────────

    /// Append a typed event and return its id.
    pub fn append(&self, event: &DomainEvent) -> Result<i64, Error> {
        if event.is_ignored() {
            return Err(Error::Other(format!(
                "refusing to append undecodable event of type '{}'",
                event.event_type()
            )));
        }
        let payload = event.payload()?;
        self.append_raw(event.event_type(), &payload)
    }

    /// Append an arbitrary `(type, data)` pair. The timestamp and checksum
    /// are assigned here; the insert commits in one transaction.
    pub fn append_raw(&self, event_type: &str, data: &Value) -> Result<i64, Error> {
        let data_json = canonical_json(data);
        let checksum = compute_checksum(event_type, &data_json);
        let ts = chrono::Utc::now().timestamp_millis();

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO events (ts, type, data, checksum, schema_ver) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ts, event_type, data_json, checksum, SCHEMA_VERSION],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!("Appended event {} ({})", id, event_type);
        Ok(id)
    }

    // ── Read ─────────────────────────────────────────────────────

    /// Records with `id > last_id`, in id order.
    pub fn read_since(&self, last_id: i64) -> Result<Vec<EventRecord>, Error> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, ts, type, data, checksum, schema_ver FROM events \
             WHERE id > ?1 ORDER BY id ASC",
        )?;
        let records = stmt
            .query_map(params![last_id], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn read_all(&self) -> Result<Vec<EventRecord>, Error> {
        self.read_since(0)
    }

    /// Highest committed id, 0 when the log is empty.
    pub fn last_id(&self) -> Result<i64, Error> {
        let conn = self.connection()?;
        let id: i64 = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM events", [], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    pub fn count(&self) -> Result<i64, Error> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    // ── Audit ────────────────────────────────────────────────────

    /// Recompute every checksum. Mismatches are reported, never repaired.
    pub fn audit(&self) -> Result<AuditReport, Error> {
        let records = self.read_all()?;
        let mut report = AuditReport {
            checked: records.len(),
            mismatches: Vec::new(),
        };
        for record in &records {
            let actual = record.recompute_checksum();
            if actual != record.checksum {
                warn!(
                    "Checksum mismatch on event {} ({}): stored {}, computed {}",
                    record.id, record.event_type, record.checksum, actual
                );
                report.mismatches.push(ChecksumMismatch {
                    id: record.id,
                    expected: record.checksum.clone(),
                    actual,
                });
            }
        }
        Ok(report)
    }

    // ── Checkpoints ──────────────────────────────────────────────

    /// Store a consumer's derived state under `name`, overwriting any
    /// previous snapshot. The events table is untouched.
    pub fn save_checkpoint(&self, name: &str, data: &Value) -> Result<(), Error> {
        let ts = chrono::Utc::now().timestamp_millis();
        self.connection()?.execute(
            "INSERT INTO checkpoints (name, data, updated_ts) VALUES (?1, ?2, ?3) \
             ON CONFLICT(name) DO UPDATE SET data = excluded.data, updated_ts = excluded.updated_ts",
            params![name, data.to_string(), ts],
        )?;
        debug!("Checkpoint '{}' saved", name);
        Ok(())
    }

    pub fn load_checkpoint(&self, name: &str) -> Result<Option<Value>, Error> {
        let raw: Option<String> = self
            .connection()?
            .query_row(
                "SELECT data FROM checkpoints WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    let id: i64 = row.get(0)?;
    let raw: String = row.get(3)?;
    // A corrupt payload decodes as null; audit() will flag the row.
    let data = serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
        warn!("Event {} has unparseable data: {}", id, e);
        Value::Null
    });
    Ok(EventRecord {
        id,
        ts: row.get(1)?,
        event_type: row.get(2)?,
        data,
        checksum: row.get(4)?,
        schema_ver: row.get(5)?,
    })
}
