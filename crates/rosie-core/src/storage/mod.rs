pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::{AuditReport, ChecksumMismatch, EventRecord};
pub use sqlite::EventLog;
