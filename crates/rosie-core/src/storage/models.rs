use serde_json::Value;

use crate::error::Error;
use crate::events::{canonical_json, DomainEvent};

/// One committed row of the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub id: i64,
    /// Append time in milliseconds since the Unix epoch.
    pub ts: i64,
    pub event_type: String,
    pub data: Value,
    pub checksum: String,
    pub schema_ver: i64,
}

impl EventRecord {
    pub fn decode(&self) -> DomainEvent {
        DomainEvent::decode(&self.event_type, &self.data)
    }

    /// Checksum recomputed from the record's own type and payload.
    pub fn recompute_checksum(&self) -> String {
        compute_checksum(&self.event_type, &canonical_json(&self.data))
    }
}

/// blake3 over the type bytes followed by the canonical payload bytes.
pub fn compute_checksum(event_type: &str, canonical_data: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(event_type.as_bytes());
    hasher.update(canonical_data.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub id: i64,
    /// Value stored with the record.
    pub expected: String,
    /// Value recomputed from the stored payload.
    pub actual: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub checked: usize,
    pub mismatches: Vec<ChecksumMismatch>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// The number of verified records, or the first mismatch as
    /// [`Error::Integrity`].
    pub fn into_result(self) -> Result<usize, Error> {
        match self.mismatches.into_iter().next() {
            None => Ok(self.checked),
            Some(m) => Err(Error::Integrity {
                id: m.id,
                expected: m.expected,
                actual: m.actual,
            }),
        }
    }
}
